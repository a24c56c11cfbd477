pub mod blocks;
pub mod calls;
pub mod receipts;
pub mod traces;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::metrics::Metrics;
use crate::models::common::RpcConfig;
use crate::models::errors::{JsonRpcErrorObject, RpcError};
use crate::utils::rate_limiter::RateLimiter;
use crate::utils::retry::{BackoffGate, retry_gated};
use crate::utils::strip_html;

// Request ids are unique across every client in the process.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// One call inside a JSON-RPC batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    id: u64,
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

/// Outcome of one call of a batch, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub id: u64,
    pub method: String,
    pub result: Result<Value, JsonRpcErrorObject>,
}

impl RpcResponse {
    pub fn into_result(self) -> Result<Value, RpcError> {
        self.result.map_err(|error| RpcError::Protocol {
            method: self.method,
            error,
        })
    }

    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, RpcError> {
        let method = self.method.clone();
        let value = self.into_result()?;
        serde_json::from_value(value).map_err(|e| {
            RpcError::MalformedResponse(format!("unexpected result for '{method}': {e}"))
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub max_retries: u32,
    pub backoff: Duration,
    pub request_timeout: Duration,
    pub retry_protocol_errors: bool,
}

impl From<&RpcConfig> for ClientSettings {
    fn from(config: &RpcConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            retry_protocol_errors: config.retry_protocol_errors,
        }
    }
}

/// Batching JSON-RPC client with a shared rate limit and a shared backoff gate.
pub struct RpcClient {
    http: reqwest::Client,
    url: Url,
    limiter: Arc<RateLimiter>,
    gate: BackoffGate,
    settings: ClientSettings,
}

impl RpcClient {
    pub fn new(url: Url, settings: ClientSettings, limiter: Arc<RateLimiter>) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            http,
            url,
            limiter,
            gate: BackoffGate::new(settings.backoff),
            settings,
        })
    }

    /// Send `calls` as one JSON array and return one response per call, in call order.
    ///
    /// Transport failures (and protocol errors, when `retry_protocol_errors` is set)
    /// are retried up to `max_retries` attempts behind the client's backoff gate. With
    /// the default policy a JSON-RPC error object is returned inside its `RpcResponse`.
    pub async fn send(&self, calls: &[MethodCall]) -> Result<Vec<RpcResponse>, RpcError> {
        self.send_with_policy(calls, self.settings.retry_protocol_errors)
            .await
    }

    /// Like [`RpcClient::send`] but never retries JSON-RPC error objects. Used for
    /// `eth_call` batches, where reverts are an expected answer.
    pub async fn send_lenient(&self, calls: &[MethodCall]) -> Result<Vec<RpcResponse>, RpcError> {
        self.send_with_policy(calls, false).await
    }

    /// Split `calls` into batches of `batch_size`, send them concurrently and return
    /// the responses in call order.
    pub async fn send_chunked(
        &self,
        calls: &[MethodCall],
        batch_size: usize,
        lenient: bool,
    ) -> Result<Vec<RpcResponse>, RpcError> {
        let batches = calls.chunks(batch_size.max(1)).map(|chunk| async move {
            if lenient {
                self.send_lenient(chunk).await
            } else {
                self.send(chunk).await
            }
        });

        Ok(try_join_all(batches).await?.into_iter().flatten().collect())
    }

    async fn send_with_policy(
        &self,
        calls: &[MethodCall],
        retry_protocol_errors: bool,
    ) -> Result<Vec<RpcResponse>, RpcError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<u64> = calls.iter().map(|_| next_request_id()).collect();
        let context = describe_batch(calls);

        retry_gated(
            |attempt| self.attempt(calls, &ids, attempt, retry_protocol_errors),
            |e: &RpcError| e.is_transport() || retry_protocol_errors,
            self.settings.max_retries,
            &self.gate,
            &context,
        )
        .await
        .map_err(|exhausted| {
            if exhausted.last_error.is_transport() || retry_protocol_errors {
                RpcError::RetriesExhausted {
                    attempts: exhausted.attempts,
                    context: context.clone(),
                    source: Box::new(exhausted.last_error),
                }
            } else {
                exhausted.last_error
            }
        })
    }

    async fn attempt(
        &self,
        calls: &[MethodCall],
        ids: &[u64],
        attempt: u32,
        retry_protocol_errors: bool,
    ) -> Result<Vec<RpcResponse>, RpcError> {
        let requests: Vec<JsonRpcRequest<'_>> = calls
            .iter()
            .zip(ids)
            .map(|(call, id)| JsonRpcRequest {
                id: *id,
                jsonrpc: "2.0",
                method: &call.method,
                params: &call.params,
            })
            .collect();

        self.limiter.acquire().await;

        let start = Instant::now();
        let result = self.post(&requests, calls, ids).await;

        if let Some(metrics) = Metrics::global() {
            metrics.record_rpc_request(
                &calls[0].method,
                start.elapsed().as_secs_f64(),
                result.is_err(),
                attempt,
            );
        }
        debug!(
            "Batch of {} '{}' call(s) finished in {:?}",
            calls.len(),
            calls[0].method,
            start.elapsed()
        );

        let responses = result?;
        if retry_protocol_errors {
            // Fail the whole attempt so the batch is retried as a unit
            let failed = responses.iter().find_map(|response| match &response.result {
                Err(error) => Some(RpcError::Protocol {
                    method: response.method.clone(),
                    error: error.clone(),
                }),
                Ok(_) => None,
            });
            if let Some(error) = failed {
                return Err(error);
            }
        }
        Ok(responses)
    }

    async fn post(
        &self,
        requests: &[JsonRpcRequest<'_>],
        calls: &[MethodCall],
        ids: &[u64],
    ) -> Result<Vec<RpcResponse>, RpcError> {
        let response = self.http.post(self.url.clone()).json(requests).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::HttpStatus {
                status: status.as_u16(),
                body: strip_html(&body),
            });
        }

        let body: Value = response.json().await?;
        let raw = match body {
            Value::Array(_) => serde_json::from_value::<Vec<JsonRpcResponse>>(body)
                .map_err(|e| RpcError::MalformedResponse(e.to_string()))?,
            // Some nodes answer a rejected batch with a single error object
            Value::Object(ref object) if object.contains_key("error") => {
                let single: JsonRpcResponse = serde_json::from_value(body)
                    .map_err(|e| RpcError::MalformedResponse(e.to_string()))?;
                let error = single.error.unwrap_or(JsonRpcErrorObject {
                    code: 0,
                    message: "batch rejected".to_string(),
                    data: None,
                });
                return Err(RpcError::Protocol {
                    method: calls[0].method.clone(),
                    error,
                });
            }
            other => {
                return Err(RpcError::MalformedResponse(format!(
                    "expected a JSON array, got: {other}"
                )));
            }
        };

        correlate(raw, calls, ids)
    }
}

/// Sort responses by id and pair each with the call it answers.
fn correlate(
    mut raw: Vec<JsonRpcResponse>,
    calls: &[MethodCall],
    ids: &[u64],
) -> Result<Vec<RpcResponse>, RpcError> {
    if raw.len() != calls.len() {
        return Err(RpcError::MalformedResponse(format!(
            "expected {} responses, got {}",
            calls.len(),
            raw.len()
        )));
    }

    raw.sort_by_key(|response| response.id);

    // Ids were handed out in call order, so the sorted responses line up with `calls`
    raw.into_iter()
        .zip(calls.iter().zip(ids))
        .map(|(response, (call, id))| {
            if response.id != *id {
                return Err(RpcError::MalformedResponse(format!(
                    "response id {} does not match request id {}",
                    response.id, id
                )));
            }
            let result = match response.error {
                Some(error) => Err(error),
                None => Ok(response.result.unwrap_or(Value::Null)),
            };
            Ok(RpcResponse {
                id: response.id,
                method: call.method.clone(),
                result,
            })
        })
        .collect()
}

fn describe_batch(calls: &[MethodCall]) -> String {
    let first = &calls[0];
    if calls.len() == 1 {
        format!("{} {}", first.method, first.params)
    } else {
        format!("{} x{} (first params {})", first.method, calls.len(), first.params)
    }
}

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::models::common::MetadataApiConfig;
use crate::models::errors::ApiError;
use crate::utils::rate_limiter::RateLimiter;
use crate::utils::retry::{BackoffGate, retry_gated};

/// Client for an Etherscan-compatible metadata API (`?module=..&action=..`).
///
/// Every attempt waits on the client's rate limiter, requests share one backoff
/// gate, and successful responses are cached for the lifetime of the client by
/// their parameters (the API key excluded).
pub struct MetadataApi {
    http: reqwest::Client,
    url: Url,
    api_key: Option<String>,
    max_attempts: u32,
    limiter: Arc<RateLimiter>,
    gate: BackoffGate,
    cache: Mutex<HashMap<String, Value>>,
}

impl MetadataApi {
    pub fn new(config: &MetadataApiConfig) -> anyhow::Result<Self> {
        let url = Url::parse(&config.url)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        info!(
            "Metadata API enabled at {} ({} call(s) per {}ms)",
            url, config.rate_limit.max_calls, config.rate_limit.period_ms
        );
        Ok(Self {
            http,
            url,
            api_key: config.api_key.clone(),
            max_attempts: config.max_attempts,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit.max_calls,
                config.rate_limit.period(),
            )),
            gate: BackoffGate::new(Duration::from_millis(config.backoff_ms)),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// GET the API with `params`, returning the `result` field of the response.
    pub async fn request(&self, params: &[(&str, &str)]) -> Result<Value, ApiError> {
        let key = cache_key(params);
        if let Some(cached) = self.cache.lock().await.get(&key) {
            debug!("Metadata API cache hit for {}", key);
            return Ok(cached.clone());
        }

        let result = retry_gated(
            |_| self.attempt(params),
            ApiError::is_retryable,
            self.max_attempts,
            &self.gate,
            &key,
        )
        .await
        .map_err(|exhausted| {
            if exhausted.last_error.is_retryable() {
                ApiError::RetriesExhausted {
                    attempts: exhausted.attempts,
                    context: key.clone(),
                    source: Box::new(exhausted.last_error),
                }
            } else {
                exhausted.last_error
            }
        })?;

        self.cache.lock().await.insert(key, result.clone());
        Ok(result)
    }

    /// Verified contract name, if the explorer knows one.
    pub async fn contract_name(&self, address: &str) -> Result<Option<String>, ApiError> {
        let result = self
            .request(&[
                ("module", "contract"),
                ("action", "getsourcecode"),
                ("address", address),
            ])
            .await?;
        Ok(parse_contract_name(&result))
    }

    async fn attempt(&self, params: &[(&str, &str)]) -> Result<Value, ApiError> {
        let mut request = self.http.get(self.url.clone()).query(params);
        if let Some(api_key) = &self.api_key {
            request = request.query(&[("apikey", api_key.as_str())]);
        }

        self.limiter.acquire().await;
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response.json().await?;
        parse_envelope(body)
    }
}

/// Parameters sorted by name, `apikey` dropped.
pub fn cache_key(params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<_> = params
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("apikey"))
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    pairs.sort();
    pairs.join("&")
}

// Explorer responses look like {"status": "1", "message": "OK", "result": ...}
fn parse_envelope(body: Value) -> Result<Value, ApiError> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("1");
    let result = body.get("result").cloned().unwrap_or(Value::Null);

    if status == "0" {
        let text = result.as_str().unwrap_or_default();
        if text.to_ascii_lowercase().contains("rate limit") {
            return Err(ApiError::RateLimited(text.to_string()));
        }
        let message = body.get("message").and_then(Value::as_str).unwrap_or_default();
        if message != "No data found" {
            return Err(ApiError::Malformed(format!("{message}: {result}")));
        }
    }

    Ok(result)
}

fn parse_contract_name(result: &Value) -> Option<String> {
    result
        .get(0)?
        .get("ContractName")?
        .as_str()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_ignores_order_and_api_key() {
        let a = cache_key(&[("module", "contract"), ("apikey", "secret"), ("address", "0xaa")]);
        let b = cache_key(&[("address", "0xaa"), ("module", "contract")]);
        assert_eq!(a, b);
        assert_eq!(a, "address=0xaa&module=contract");
    }

    #[test]
    fn test_parse_envelope() {
        let ok = json!({ "status": "1", "message": "OK", "result": [{ "ContractName": "UniswapV2Pair" }] });
        let result = parse_envelope(ok).unwrap();
        assert_eq!(parse_contract_name(&result).as_deref(), Some("UniswapV2Pair"));

        let unverified = json!([{ "ContractName": "" }]);
        assert_eq!(parse_contract_name(&unverified), None);

        let limited = json!({ "status": "0", "message": "NOTOK", "result": "Max rate limit reached" });
        assert!(matches!(parse_envelope(limited), Err(ApiError::RateLimited(_))));

        let invalid = json!({ "status": "0", "message": "NOTOK", "result": "Invalid API Key" });
        let err = parse_envelope(invalid).unwrap_err();
        assert!(!err.is_retryable());
    }
}

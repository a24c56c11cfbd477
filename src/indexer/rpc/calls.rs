use alloy_primitives::{Address, Bytes};
use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;

use crate::indexer::rpc::{MethodCall, RpcClient};

/// A read-only contract call.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractCall {
    pub to: Address,
    pub data: Bytes,
}

/// Execute `eth_call` against the latest state for each call.
///
/// Reverts and empty return data come back as `None`; only transport failures
/// fail the whole batch.
pub async fn eth_call_batch(
    client: &RpcClient,
    calls: &[ContractCall],
    request_batch_size: usize,
) -> Result<Vec<Option<Bytes>>> {
    let method_calls: Vec<MethodCall> = calls
        .iter()
        .map(|call| {
            MethodCall::new(
                "eth_call",
                json!([{ "to": call.to, "data": call.data }, "latest"]),
            )
        })
        .collect();

    let responses = client
        .send_chunked(&method_calls, request_batch_size, true)
        .await
        .context("eth_call batch failed")?;

    Ok(responses
        .into_iter()
        .zip(calls)
        .map(|(response, call)| match response.deserialize::<Bytes>() {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                debug!("eth_call to {} returned no data: {}", call.to, e);
                None
            }
        })
        .collect())
}

use alloy_rpc_types_trace::parity::LocalizedTransactionTrace;
use anyhow::{Context, Result};
use serde_json::json;

use crate::indexer::rpc::blocks::block_tag;
use crate::indexer::rpc::{MethodCall, RpcClient};
use crate::models::rpc::parse_payload;
use crate::models::rpc::traces::RawTraces;

/// Fetch Parity-style traces with `trace_block`. A `null` result (no traces) is empty.
pub async fn get_block_traces(
    client: &RpcClient,
    block_numbers: &[u64],
    request_batch_size: usize,
) -> Result<Vec<RawTraces>> {
    let calls: Vec<MethodCall> = block_numbers
        .iter()
        .map(|number| MethodCall::new("trace_block", json!([block_tag(*number)])))
        .collect();

    let responses = client
        .send_chunked(&calls, request_batch_size, false)
        .await
        .context("trace_block batch failed")?;

    responses
        .into_iter()
        .zip(block_numbers)
        .map(|(response, block_number)| -> Result<_> {
            let value = response.into_result()?;
            let traces: Vec<LocalizedTransactionTrace> = if value.is_null() {
                Vec::new()
            } else {
                parse_payload(&value, "block traces")?
            };
            Ok(RawTraces {
                block_number: *block_number,
                traces,
            })
        })
        .collect()
}

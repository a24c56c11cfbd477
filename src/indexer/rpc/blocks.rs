use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::indexer::rpc::{MethodCall, RpcClient};
use crate::models::errors::ValidationError;
use crate::models::rpc::blocks::RpcBlock;
use crate::models::rpc::parse_payload;

pub(crate) fn block_tag(block_number: u64) -> Value {
    json!(format!("0x{block_number:x}"))
}

/// Fetch full blocks (with transaction objects) for `block_numbers`, in order.
pub async fn get_blocks(
    client: &RpcClient,
    block_numbers: &[u64],
    request_batch_size: usize,
) -> Result<Vec<RpcBlock>> {
    let calls: Vec<MethodCall> = block_numbers
        .iter()
        .map(|number| MethodCall::new("eth_getBlockByNumber", json!([block_tag(*number), true])))
        .collect();

    let responses = client
        .send_chunked(&calls, request_batch_size, false)
        .await
        .context("eth_getBlockByNumber batch failed")?;

    responses
        .into_iter()
        .zip(block_numbers)
        .map(|(response, block_number)| -> Result<_> {
            let value = response.into_result()?;
            if value.is_null() {
                return Err(ValidationError::NotFound {
                    what: "block",
                    block_number: *block_number,
                }
                .into());
            }
            Ok(parse_payload::<RpcBlock>(&value, "block")?)
        })
        .collect()
}

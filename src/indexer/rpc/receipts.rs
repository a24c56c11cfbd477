use anyhow::{Context, Result};
use serde_json::json;

use crate::indexer::rpc::blocks::block_tag;
use crate::indexer::rpc::{MethodCall, RpcClient};
use crate::models::errors::ValidationError;
use crate::models::rpc::parse_payload;
use crate::models::rpc::receipts::{RawReceipts, RpcReceipt};

/// Fetch every receipt of each block with `eth_getBlockReceipts`.
pub async fn get_block_receipts(
    client: &RpcClient,
    block_numbers: &[u64],
    request_batch_size: usize,
) -> Result<Vec<RawReceipts>> {
    let calls: Vec<MethodCall> = block_numbers
        .iter()
        .map(|number| MethodCall::new("eth_getBlockReceipts", json!([block_tag(*number)])))
        .collect();

    let responses = client
        .send_chunked(&calls, request_batch_size, false)
        .await
        .context("eth_getBlockReceipts batch failed")?;

    responses
        .into_iter()
        .zip(block_numbers)
        .map(|(response, block_number)| -> Result<_> {
            let value = response.into_result()?;
            if value.is_null() {
                return Err(ValidationError::NotFound {
                    what: "receipts",
                    block_number: *block_number,
                }
                .into());
            }
            let receipts: Vec<RpcReceipt> = parse_payload(&value, "block receipts")?;
            Ok(RawReceipts {
                block_number: *block_number,
                receipts,
            })
        })
        .collect()
}

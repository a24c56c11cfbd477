use alloy_primitives::hex;

use crate::indexer::transformations::block_time;
use crate::models::datasets::blocks::Block;
use crate::models::errors::ValidationError;
use crate::models::rpc::blocks::RpcBlock;
use crate::utils::{hash_to_string, normalize_address};

pub trait BlockTransformer {
    fn transform_blocks(blocks: &[RpcBlock]) -> Result<Vec<Block>, ValidationError>;
}

impl BlockTransformer for RpcBlock {
    fn transform_blocks(blocks: &[RpcBlock]) -> Result<Vec<Block>, ValidationError> {
        blocks
            .iter()
            .map(|block| {
                let block_time = block_time(block, "block")?;

                Ok(Block {
                    block_number: block.number,
                    block_hash: hash_to_string(&block.hash),
                    parent_hash: hash_to_string(&block.parent_hash),
                    block_time,
                    block_date: block_time.date_naive(),
                    nonce: block.nonce.map(hex::encode_prefixed),
                    sha3_uncles: block.sha3_uncles.as_ref().map(hash_to_string),
                    transactions_root: block.transactions_root.as_ref().map(hash_to_string),
                    state_root: block.state_root.as_ref().map(hash_to_string),
                    receipts_root: block.receipts_root.as_ref().map(hash_to_string),
                    withdrawals_root: block.withdrawals_root.as_ref().map(hash_to_string),
                    miner: normalize_address(&block.miner),
                    difficulty: block.difficulty.map(|value| value.to_string()),
                    total_difficulty: block.total_difficulty.map(|value| value.to_string()),
                    base_fee_per_gas: block.base_fee_per_gas.map(|value| value.to_string()),
                    size: block.size,
                    extra_data: block.extra_data.to_string(),
                    gas_limit: block.gas_limit,
                    gas_used: block.gas_used,
                    blob_gas_used: block.blob_gas_used,
                    excess_blob_gas: block.excess_blob_gas,
                    transaction_count: block.transactions.len() as u64,
                    withdrawal_count: block
                        .withdrawals
                        .as_ref()
                        .map(|withdrawals| withdrawals.len() as u64)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_block() -> RpcBlock {
        serde_json::from_value(json!({
            "number": "0x12d687",
            "hash": "0x5b6e3f4c7a1ddf4e0e6f0c9a2c8f9e1f4c3d2b1a0f9e8d7c6b5a4f3e2d1c0b0a",
            "parentHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "nonce": "0x0000000000000000",
            "miner": "0x95222290DD7278Aa3Ddd389Cc1E1d165CC4BAfe5",
            "difficulty": "0x0",
            "totalDifficulty": "0x400",
            "size": "0x2a1",
            "extraData": "0x6265617665726275696c642e6f7267",
            "gasLimit": "0x1c9c380",
            "gasUsed": "0x5208",
            "timestamp": "0x6553f100",
            "baseFeePerGas": "0x3b9aca00",
            "transactions": [{
                "hash": "0x2222222222222222222222222222222222222222222222222222222222222222",
                "nonce": "0x7",
                "blockHash": "0x5b6e3f4c7a1ddf4e0e6f0c9a2c8f9e1f4c3d2b1a0f9e8d7c6b5a4f3e2d1c0b0a",
                "blockNumber": "0x12d687",
                "transactionIndex": "0x0",
                "from": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                "to": null,
                "value": "0xde0b6b3a7640000",
                "gasPrice": "0x3b9aca00",
                "gas": "0x5208",
                "input": "0x",
                "type": "0x2",
                "maxFeePerGas": "0x77359400",
                "maxPriorityFeePerGas": "0x3b9aca00",
                "chainId": "0x1"
            }],
            "withdrawals": [{
                "index": "0x1d",
                "validatorIndex": "0x2a",
                "address": "0xB9D7934878B5FB9610B3fE8A5e441e8fad7E293f",
                "amount": "0xe5f4c6"
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_transform_block() {
        let blocks = RpcBlock::transform_blocks(&[sample_block()]).unwrap();
        let block = &blocks[0];

        assert_eq!(block.block_number, 1_234_567);
        assert_eq!(block.miner, "0x95222290dd7278aa3ddd389cc1e1d165cc4bafe5");
        assert_eq!(block.base_fee_per_gas.as_deref(), Some("1000000000"));
        assert_eq!(block.total_difficulty.as_deref(), Some("1024"));
        assert_eq!(block.transaction_count, 1);
        assert_eq!(block.withdrawal_count, 1);
        assert_eq!(block.block_time.timestamp(), 0x6553f100);
        assert_eq!(block.block_date, block.block_time.date_naive());
    }

    #[test]
    fn test_out_of_range_timestamp_is_rejected() {
        let mut block = sample_block();
        // Would wrap to -1 with a plain cast
        block.timestamp = u64::MAX;

        let err = RpcBlock::transform_blocks(&[block]).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidField { entity: "block", field: "timestamp", .. }
        ));
    }
}

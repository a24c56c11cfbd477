use crate::indexer::transformations::invalid;
use crate::models::datasets::logs::Log;
use crate::models::datasets::receipts::Receipt;
use crate::models::errors::ValidationError;
use crate::models::rpc::receipts::RawReceipts;
use crate::utils::{hash_to_string, normalize_address};

pub trait ReceiptTransformer {
    fn transform_receipts(raw: &[RawReceipts]) -> Vec<Receipt>;
    fn transform_logs(raw: &[RawReceipts]) -> Result<Vec<Log>, ValidationError>;
}

impl ReceiptTransformer for RawReceipts {
    fn transform_receipts(raw: &[RawReceipts]) -> Vec<Receipt> {
        raw.iter()
            .flat_map(|block| {
                block.receipts.iter().map(|receipt| Receipt {
                    tx_hash: hash_to_string(&receipt.transaction_hash),
                    block_number: block.block_number,
                    block_hash: receipt.block_hash.as_ref().map(hash_to_string),
                    tx_index: receipt.transaction_index,
                    tx_type: receipt.transaction_type,
                    from_address: normalize_address(&receipt.from),
                    to_address: receipt.to.as_ref().map(normalize_address),
                    contract_address: receipt.contract_address.as_ref().map(normalize_address),
                    cumulative_gas_used: receipt.cumulative_gas_used,
                    gas_used: receipt.gas_used,
                    effective_gas_price: receipt.effective_gas_price.map(|value| value.to_string()),
                    blob_gas_used: receipt.blob_gas_used,
                    blob_gas_price: receipt.blob_gas_price.map(|value| value.to_string()),
                    status: receipt.status,
                    log_count: receipt.logs.len() as u64,
                })
            })
            .collect()
    }

    fn transform_logs(raw: &[RawReceipts]) -> Result<Vec<Log>, ValidationError> {
        let mut logs = Vec::new();

        for block in raw {
            for receipt in &block.receipts {
                for log in &receipt.logs {
                    let log_index = log.log_index.ok_or_else(|| {
                        invalid(
                            log,
                            ValidationError::MissingField {
                                entity: "log",
                                field: "log_index",
                            },
                        )
                    })?;

                    logs.push(Log {
                        block_number: block.block_number,
                        block_hash: log
                            .block_hash
                            .or(receipt.block_hash)
                            .as_ref()
                            .map(hash_to_string),
                        tx_hash: hash_to_string(&log.transaction_hash.unwrap_or(receipt.transaction_hash)),
                        tx_index: log.transaction_index.or(receipt.transaction_index),
                        log_index,
                        address: normalize_address(&log.address),
                        topics: log.topics.clone(),
                        data: log.data.clone(),
                        removed: log.removed,
                    });
                }
            }
        }

        Ok(logs)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::datasets::Entity;
    use serde_json::json;

    pub(crate) fn sample_receipts() -> RawReceipts {
        RawReceipts {
            block_number: 100,
            receipts: serde_json::from_value(json!([{
                "transactionHash": "0x3333333333333333333333333333333333333333333333333333333333333333",
                "transactionIndex": "0x0",
                "blockHash": "0x4444444444444444444444444444444444444444444444444444444444444444",
                "blockNumber": "0x64",
                "from": "0x28C6c06298d514Db089934071355E5743bf21d60",
                "to": "0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc",
                "cumulativeGasUsed": "0x1e8480",
                "gasUsed": "0x1e8480",
                "contractAddress": null,
                "status": "0x1",
                "effectiveGasPrice": "0x3b9aca00",
                "type": "0x2",
                "logs": [{
                    "address": "0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc",
                    "topics": [
                        "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                        "0x00000000000000000000000028c6c06298d514db089934071355e5743bf21d60",
                        "0x000000000000000000000000b4e16d0168e52d35cacd2c6185b44281ec28c9dc"
                    ],
                    "data": "0x00000000000000000000000000000000000000000000000000000000000003e8",
                    "blockNumber": "0x64",
                    "transactionHash": "0x3333333333333333333333333333333333333333333333333333333333333333",
                    "transactionIndex": "0x0",
                    "logIndex": "0x5",
                    "removed": false
                }]
            }]))
            .unwrap(),
        }
    }

    #[test]
    fn test_transform_receipts() {
        let receipts = RawReceipts::transform_receipts(&[sample_receipts()]);
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].status, Some(1));
        assert_eq!(receipts[0].log_count, 1);
        assert_eq!(receipts[0].effective_gas_price.as_deref(), Some("1000000000"));
        assert_eq!(receipts[0].to_address.as_deref(), Some("0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc"));
    }

    #[test]
    fn test_transform_logs() {
        let logs = RawReceipts::transform_logs(&[sample_receipts()]).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log_index, 5);
        assert_eq!(logs[0].topics.len(), 3);
        // Block hash falls back to the receipt's
        assert_eq!(
            logs[0].block_hash.as_deref(),
            Some("0x4444444444444444444444444444444444444444444444444444444444444444")
        );
        assert_eq!(
            logs[0].primary_key(),
            "0x3333333333333333333333333333333333333333333333333333333333333333_5"
        );
    }

    #[test]
    fn test_log_without_index_is_rejected() {
        let mut raw = sample_receipts();
        raw.receipts[0].logs[0].log_index = None;
        assert!(matches!(
            RawReceipts::transform_logs(&[raw]),
            Err(ValidationError::MissingField { field: "log_index", .. })
        ));
    }
}

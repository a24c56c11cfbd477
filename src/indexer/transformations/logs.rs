use tracing::warn;

use crate::abi::protocols::SignatureTable;
use crate::abi::{AbiCodec, ProtocolId};
use crate::metrics::Metrics;
use crate::models::common::EntityKind;
use crate::models::datasets::logs::{Log, Transfer};
use crate::models::errors::DecodeError;
use crate::utils::normalize_address;

pub trait TransferTransformer {
    fn transform_transfers(
        logs: &[Log],
        codec: &AbiCodec,
        signatures: &SignatureTable,
    ) -> Vec<Transfer>;
}

impl TransferTransformer for Log {
    /// ERC-20 transfers. ERC-721 shares the topic but indexes the token id as a
    /// fourth topic, so only three-topic logs qualify.
    fn transform_transfers(
        logs: &[Log],
        codec: &AbiCodec,
        signatures: &SignatureTable,
    ) -> Vec<Transfer> {
        let transfer_topic = signatures.transfer_topic();

        logs.iter()
            .filter(|log| log.topics.len() == 3 && log.topics[0] == transfer_topic)
            .filter_map(|log| match decode_transfer(codec, log) {
                Ok(transfer) => Some(transfer),
                Err(e) => {
                    warn!(
                        "Skipping Transfer log {} #{}: {}",
                        log.tx_hash, log.log_index, e
                    );
                    if let Some(metrics) = Metrics::global() {
                        metrics.record_decode_failure(EntityKind::Transfer);
                    }
                    None
                }
            })
            .collect()
    }
}

fn decode_transfer(codec: &AbiCodec, log: &Log) -> Result<Transfer, DecodeError> {
    let fields = codec.decode_log(ProtocolId::Erc20, "Transfer", &log.topics, &log.data)?;

    Ok(Transfer {
        block_number: log.block_number,
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index,
        token_address: log.address.clone(),
        from_address: normalize_address(&fields.address("from")?),
        to_address: normalize_address(&fields.address("to")?),
        value: fields.uint("value")?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::transformations::receipts::ReceiptTransformer;
    use crate::indexer::transformations::receipts::tests::sample_receipts;
    use crate::models::rpc::receipts::RawReceipts;
    use alloy_primitives::Bytes;

    fn setup() -> (AbiCodec, SignatureTable) {
        let codec = AbiCodec::new().unwrap();
        let signatures = SignatureTable::new(&codec).unwrap();
        (codec, signatures)
    }

    #[test]
    fn test_transform_transfers() {
        let (codec, signatures) = setup();
        let logs = RawReceipts::transform_logs(&[sample_receipts()]).unwrap();

        let transfers = Log::transform_transfers(&logs, &codec, &signatures);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].value, "1000");
        assert_eq!(transfers[0].from_address, "0x28c6c06298d514db089934071355e5743bf21d60");
        assert_eq!(transfers[0].token_address, "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc");
    }

    #[test]
    fn test_malformed_transfer_is_skipped() {
        let (codec, signatures) = setup();
        let mut logs = RawReceipts::transform_logs(&[sample_receipts()]).unwrap();
        let mut broken = logs[0].clone();
        broken.log_index = 6;
        broken.data = Bytes::from(vec![0u8; 3]);
        logs.push(broken);

        let transfers = Log::transform_transfers(&logs, &codec, &signatures);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].log_index, 5);
    }

    #[test]
    fn test_erc721_transfer_is_ignored() {
        let (codec, signatures) = setup();
        let mut logs = RawReceipts::transform_logs(&[sample_receipts()]).unwrap();
        logs[0].topics.push(alloy_primitives::B256::with_last_byte(1));
        logs[0].data = Bytes::new();

        assert!(Log::transform_transfers(&logs, &codec, &signatures).is_empty());
    }
}

use crate::models::datasets::transactions::{Transaction, Withdrawal};
use crate::models::errors::ValidationError;
use crate::models::rpc::blocks::RpcBlock;
use crate::indexer::transformations::block_time;
use crate::utils::{hash_to_string, normalize_address};

pub trait TransactionTransformer {
    fn transform_transactions(blocks: &[RpcBlock]) -> Result<Vec<Transaction>, ValidationError>;
    fn transform_withdrawals(blocks: &[RpcBlock]) -> Vec<Withdrawal>;
}

impl TransactionTransformer for RpcBlock {
    fn transform_transactions(blocks: &[RpcBlock]) -> Result<Vec<Transaction>, ValidationError> {
        let mut transactions = Vec::new();

        for block in blocks {
            let block_time = block_time(block, "transaction")?;

            for tx in &block.transactions {
                transactions.push(Transaction {
                    tx_hash: hash_to_string(&tx.hash),
                    block_number: block.number,
                    // Pending-style payloads omit the block hash; the enclosing block has it
                    block_hash: hash_to_string(&tx.block_hash.unwrap_or(block.hash)),
                    block_time,
                    tx_index: tx.transaction_index,
                    tx_type: tx.transaction_type,
                    nonce: tx.nonce,
                    from_address: normalize_address(&tx.from),
                    to_address: tx.to.as_ref().map(normalize_address),
                    value: tx.value.to_string(),
                    gas_limit: tx.gas,
                    gas_price: tx.gas_price.map(|value| value.to_string()),
                    max_fee_per_gas: tx.max_fee_per_gas.map(|value| value.to_string()),
                    max_priority_fee_per_gas: tx
                        .max_priority_fee_per_gas
                        .map(|value| value.to_string()),
                    max_fee_per_blob_gas: tx.max_fee_per_blob_gas.map(|value| value.to_string()),
                    blob_versioned_hashes: tx
                        .blob_versioned_hashes
                        .iter()
                        .flatten()
                        .map(hash_to_string)
                        .collect(),
                    input: tx.input.to_string(),
                    chain_id: tx.chain_id,
                });
            }
        }

        Ok(transactions)
    }

    fn transform_withdrawals(blocks: &[RpcBlock]) -> Vec<Withdrawal> {
        blocks
            .iter()
            .flat_map(|block| {
                block
                    .withdrawals
                    .iter()
                    .flatten()
                    .enumerate()
                    .map(|(index, withdrawal)| Withdrawal {
                        block_number: block.number,
                        index: index as u64,
                        withdrawal_index: withdrawal.index,
                        validator_index: withdrawal.validator_index,
                        address: normalize_address(&withdrawal.address),
                        amount: withdrawal.amount.to_string(),
                    })
            })
            .collect()
    }
}

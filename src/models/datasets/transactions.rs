use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::common::EntityKind;
use crate::models::datasets::Entity;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub tx_hash: String,
    pub block_number: u64,
    pub block_hash: String,
    pub block_time: DateTime<Utc>,
    pub tx_index: Option<u64>,
    pub tx_type: Option<u64>,
    pub nonce: u64,
    pub from_address: String,
    pub to_address: Option<String>,
    pub value: String,
    pub gas_limit: u64,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub max_fee_per_blob_gas: Option<String>,
    pub blob_versioned_hashes: Vec<String>,
    pub input: String,
    pub chain_id: Option<u64>,
}

impl Entity for Transaction {
    const KIND: EntityKind = EntityKind::Transaction;

    fn primary_key(&self) -> String {
        self.tx_hash.clone()
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.block_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Withdrawal {
    pub block_number: u64,
    /// Position within the block.
    pub index: u64,
    pub withdrawal_index: u64,
    pub validator_index: u64,
    pub address: String,
    /// Gwei, as a decimal string.
    pub amount: String,
}

impl Entity for Withdrawal {
    const KIND: EntityKind = EntityKind::Withdrawal;

    fn primary_key(&self) -> String {
        format!("{}_{}", self.block_number, self.index)
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.block_number)
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::models::common::EntityKind;
use crate::models::datasets::Entity;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub block_number: u64,
    pub block_hash: String,
    pub parent_hash: String,
    pub block_time: DateTime<Utc>,
    pub block_date: NaiveDate,
    pub nonce: Option<String>,
    pub sha3_uncles: Option<String>,
    pub transactions_root: Option<String>,
    pub state_root: Option<String>,
    pub receipts_root: Option<String>,
    pub withdrawals_root: Option<String>,
    pub miner: String,
    // Arbitrary-precision values are carried as decimal strings
    pub difficulty: Option<String>,
    pub total_difficulty: Option<String>,
    pub base_fee_per_gas: Option<String>,
    pub size: Option<u64>,
    pub extra_data: String,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub transaction_count: u64,
    pub withdrawal_count: u64,
}

impl Entity for Block {
    const KIND: EntityKind = EntityKind::Block;

    fn primary_key(&self) -> String {
        self.block_number.to_string()
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.block_number)
    }
}

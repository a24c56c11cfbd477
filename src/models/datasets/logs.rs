use alloy_primitives::{B256, Bytes};
use serde::Serialize;

use crate::models::common::EntityKind;
use crate::models::datasets::Entity;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Log {
    pub block_number: u64,
    pub block_hash: Option<String>,
    pub tx_hash: String,
    pub tx_index: Option<u64>,
    pub log_index: u64,
    pub address: String,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub removed: bool,
}

impl Entity for Log {
    const KIND: EntityKind = EntityKind::Log;

    fn primary_key(&self) -> String {
        format!("{}_{}", self.tx_hash, self.log_index)
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.block_number)
    }
}

/// ERC-20 `Transfer` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub token_address: String,
    pub from_address: String,
    pub to_address: String,
    pub value: String,
}

impl Entity for Transfer {
    const KIND: EntityKind = EntityKind::Transfer;

    fn primary_key(&self) -> String {
        format!("{}_{}_{}", self.block_number, self.tx_hash, self.log_index)
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.block_number)
    }
}

use serde::Serialize;

use crate::models::common::EntityKind;
use crate::models::datasets::Entity;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub block_hash: Option<String>,
    pub tx_index: Option<u64>,
    pub tx_type: Option<u64>,
    pub from_address: String,
    pub to_address: Option<String>,
    pub contract_address: Option<String>,
    pub cumulative_gas_used: u64,
    pub gas_used: Option<u64>,
    pub effective_gas_price: Option<String>,
    pub blob_gas_used: Option<u64>,
    pub blob_gas_price: Option<String>,
    pub status: Option<u64>,
    pub log_count: u64,
}

impl Entity for Receipt {
    const KIND: EntityKind = EntityKind::Receipt;

    fn primary_key(&self) -> String {
        self.tx_hash.clone()
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.block_number)
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::abi::protocols::{Dex, DexEventTag};
use crate::models::common::EntityKind;
use crate::models::datasets::Entity;

/// A decoded DEX event with signed token flows resolved into in/out amounts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub block_number: u64,
    pub block_time: Option<DateTime<Utc>>,
    pub tx_hash: String,
    pub log_index: u64,
    pub pool_address: String,
    pub dex: Dex,
    pub event_type: DexEventTag,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub amount0_in: String,
    pub amount1_in: String,
    pub amount0_out: String,
    pub amount1_out: String,
    // Filled by the enrichment pass once pools and tokens are known
    pub token0_address: Option<String>,
    pub token1_address: Option<String>,
    /// Fee tier in hundredths of a bip, v3 pools only.
    pub fee: Option<u32>,
    pub token0_symbol: Option<String>,
    pub token1_symbol: Option<String>,
    pub token0_decimals: Option<u8>,
    pub token1_decimals: Option<u8>,
}

impl Entity for Event {
    const KIND: EntityKind = EntityKind::Event;

    fn primary_key(&self) -> String {
        format!("{}_{}_{}", self.block_number, self.tx_hash, self.log_index)
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.block_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pool {
    pub pool_address: String,
    pub dex: Dex,
    pub token0_address: Option<String>,
    pub token1_address: Option<String>,
    pub fee: Option<u32>,
    /// Set when the creation event was seen by this run.
    pub created_block: Option<u64>,
    pub created_tx: Option<String>,
}

impl Entity for Pool {
    const KIND: EntityKind = EntityKind::Pool;

    fn primary_key(&self) -> String {
        self.pool_address.clone()
    }

    fn block_number(&self) -> Option<u64> {
        self.created_block
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub token_address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    pub total_supply: Option<String>,
}

impl Entity for Token {
    const KIND: EntityKind = EntityKind::Token;

    fn primary_key(&self) -> String {
        self.token_address.clone()
    }

    fn block_number(&self) -> Option<u64> {
        None
    }
}

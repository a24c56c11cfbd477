pub mod accounts;
pub mod blocks;
pub mod events;
pub mod logs;
pub mod receipts;
pub mod traces;
pub mod transactions;

use serde::Serialize;

use crate::models::common::{EntityKind, Record};
use crate::models::rpc::blocks::RpcBlock;
use crate::models::rpc::receipts::RawReceipts;
use crate::models::rpc::traces::RawTraces;

/// A typed record with a stable primary key.
pub trait Entity: Serialize + Send + Sync + 'static {
    const KIND: EntityKind;

    fn primary_key(&self) -> String;

    fn block_number(&self) -> Option<u64>;

    fn to_record(&self) -> Result<Record, serde_json::Error> {
        Ok(Record {
            key: self.primary_key(),
            block_number: self.block_number(),
            data: serde_json::to_value(self)?,
        })
    }
}

impl Entity for RpcBlock {
    const KIND: EntityKind = EntityKind::RawBlock;

    // Blocks are always fetched with full transaction objects
    fn primary_key(&self) -> String {
        format!("{}_full", self.number)
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.number)
    }
}

impl Entity for RawReceipts {
    const KIND: EntityKind = EntityKind::RawReceipt;

    fn primary_key(&self) -> String {
        self.block_number.to_string()
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.block_number)
    }
}

impl Entity for RawTraces {
    const KIND: EntityKind = EntityKind::RawTrace;

    fn primary_key(&self) -> String {
        self.block_number.to_string()
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.block_number)
    }
}

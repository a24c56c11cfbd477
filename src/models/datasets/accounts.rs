use serde::Serialize;

use crate::models::common::EntityKind;
use crate::models::datasets::Entity;

/// An externally visible address seen as a transaction sender or recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub address: String,
    pub first_seen_block: u64,
}

impl Entity for Account {
    const KIND: EntityKind = EntityKind::Account;

    fn primary_key(&self) -> String {
        self.address.clone()
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.first_seen_block)
    }
}

/// A contract seen either at creation or as a log emitter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contract {
    pub address: String,
    pub first_seen_block: u64,
    pub creation_tx_hash: Option<String>,
    pub name: Option<String>,
}

impl Entity for Contract {
    const KIND: EntityKind = EntityKind::Contract;

    fn primary_key(&self) -> String {
        self.address.clone()
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.first_seen_block)
    }
}

use serde::Serialize;

use crate::models::common::EntityKind;
use crate::models::datasets::Entity;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub block_number: u64,
    pub block_hash: Option<String>,
    pub tx_hash: Option<String>,
    pub tx_position: Option<u64>,
    pub trace_address: Vec<usize>,
    pub subtraces: usize,
    pub trace_type: String,
    pub call_type: Option<String>,
    pub reward_type: Option<String>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub value: Option<String>,
    pub gas: Option<u64>,
    pub gas_used: Option<u64>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl Entity for Trace {
    const KIND: EntityKind = EntityKind::Trace;

    // Block rewards have no transaction position
    fn primary_key(&self) -> String {
        let position = self
            .tx_position
            .map(|position| position.to_string())
            .unwrap_or_else(|| "block".to_string());
        let address = self
            .trace_address
            .iter()
            .map(|index| index.to_string())
            .collect::<Vec<_>>()
            .join("_");
        format!("{}_{}_{}_{}", self.block_number, position, self.trace_type, address)
    }

    fn block_number(&self) -> Option<u64> {
        Some(self.block_number)
    }
}

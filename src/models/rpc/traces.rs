use alloy_rpc_types_trace::parity::LocalizedTransactionTrace;
use serde::{Deserialize, Serialize};

/// All traces of one block, as returned by `trace_block`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTraces {
    pub block_number: u64,
    pub traces: Vec<LocalizedTransactionTrace>,
}

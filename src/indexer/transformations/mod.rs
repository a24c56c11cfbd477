//! Pure mappings from upstream entities to downstream entities. Nothing here does I/O.

pub mod accounts;
pub mod blocks;
pub mod events;
pub mod logs;
pub mod receipts;
pub mod traces;
pub mod transactions;

use chrono::{DateTime, Utc};
use tracing::error;

use crate::models::errors::ValidationError;
use crate::models::rpc::blocks::RpcBlock;

// Validation failures are fatal for the record; the offending payload is logged first.
pub(crate) fn invalid<T: std::fmt::Debug>(payload: &T, error: ValidationError) -> ValidationError {
    error!("{} in payload: {:?}", error, payload);
    error
}

/// The block's timestamp as a UTC time. Timestamps beyond `i64` seconds or chrono's
/// range are rejected rather than wrapped.
pub(crate) fn block_time(block: &RpcBlock, entity: &'static str) -> Result<DateTime<Utc>, ValidationError> {
    i64::try_from(block.timestamp)
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .ok_or_else(|| {
            invalid(
                block,
                ValidationError::InvalidField {
                    entity,
                    field: "timestamp",
                    value: block.timestamp.to_string(),
                },
            )
        })
}

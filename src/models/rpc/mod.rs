pub mod blocks;
pub mod receipts;
pub mod traces;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::error;

use crate::models::errors::ValidationError;

/// Deserialize an RPC payload into its typed form, logging the raw payload on failure.
pub fn parse_payload<T: DeserializeOwned>(
    value: &Value,
    what: &'static str,
) -> Result<T, ValidationError> {
    T::deserialize(value).map_err(|source| {
        error!("Invalid {} payload ({}): {}", what, source, value);
        ValidationError::Payload { what, source }
    })
}

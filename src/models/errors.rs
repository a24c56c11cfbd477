use thiserror::Error;

use crate::models::common::EntityKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid block range: start block {start} is after end block {end}")]
    InvalidBlockRange { start: u64, end: u64 },
    #[error("Invalid batch size for '{field}': must be greater than zero")]
    InvalidBatchSize { field: &'static str },
    #[error("Unknown entity kind: {name}")]
    UnknownEntityKind { name: String },
    #[error("Unknown sink: {name}")]
    UnknownSink { name: String },
    #[error("Sink '{sink}' is enabled but its '{section}' config section is missing")]
    MissingSinkSection { sink: String, section: &'static str },
    #[error("No entity kinds requested")]
    NoEntities,
}

/// A well-formed JSON-RPC error object returned by the node.
#[derive(Error, Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[error("JSON-RPC error {code}: {message}")]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Protocol error for '{method}': {error}")]
    Protocol {
        method: String,
        error: JsonRpcErrorObject,
    },
    #[error("Malformed JSON-RPC response: {0}")]
    MalformedResponse(String),
    #[error("'{context}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        context: String,
        #[source]
        source: Box<RpcError>,
    },
}

impl RpcError {
    /// Transport-level failures, as opposed to deterministic errors reported by the node.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Transport(_) | RpcError::HttpStatus { .. } | RpcError::MalformedResponse(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Unexpected response: {0}")]
    Malformed(String),
    #[error("'{context}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        context: String,
        #[source]
        source: Box<ApiError>,
    },
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::RateLimited(_) => true,
            ApiError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid signature '{signature}': {reason}")]
    Signature { signature: String, reason: String },
    #[error("Unknown {what} '{name}' for protocol {protocol}")]
    Unknown {
        protocol: String,
        what: &'static str,
        name: String,
    },
    #[error("ABI decoding failed: {0}")]
    Abi(#[from] alloy_dyn_abi::Error),
    #[error("Decoded value has unexpected shape: {0}")]
    UnexpectedShape(String),
    #[error("Missing decoded field '{field}'")]
    MissingField { field: String },
    #[error("Field '{field}' is not of type {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid {what} payload: {source}")]
    Payload {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Missing required field in {entity}: {field}")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },
    #[error("Invalid value for {entity}.{field}: {value}")]
    InvalidField {
        entity: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("Provider returned no {what} for block {block_number}")]
    NotFound {
        what: &'static str,
        block_number: u64,
    },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Sink '{sink}' rejected duplicate key '{key}' for {kind}")]
    DuplicateKey {
        sink: String,
        kind: EntityKind,
        key: String,
    },
    #[error("{failures} export(s) failed for blocks {first_block}-{last_block}: {details}")]
    WindowFailed {
        failures: usize,
        first_block: u64,
        last_block: u64,
        details: String,
    },
    #[error("Unknown sink index {0}")]
    UnknownSink(usize),
}

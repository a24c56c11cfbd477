use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::errors::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 9100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_calls: usize,
    pub period_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 10,
            period_ms: 1_000,
        }
    }
}

impl RateLimitConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub request_timeout_ms: u64,
    // JSON-RPC error objects (reverts, bad params) are deterministic, so they are
    // handed back to the caller unless this is set.
    pub retry_protocol_errors: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_ms: 5_000,
            request_timeout_ms: 30_000,
            retry_protocol_errors: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigQueryConfig {
    pub dataset: String,
    #[serde(default = "default_dataset_location")]
    pub location: String,
}

fn default_dataset_location() -> String {
    "US".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataApiConfig {
    pub url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_api_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_api_backoff_ms")]
    pub backoff_ms: u64,
    // Explorer free tiers allow about 5 calls per second
    #[serde(default = "default_api_rate_limit")]
    pub rate_limit: RateLimitConfig,
}

fn default_api_max_attempts() -> u32 {
    5
}

fn default_api_backoff_ms() -> u64 {
    1_000
}

fn default_api_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        max_calls: 5,
        period_ms: 1_000,
    }
}

fn default_process_batch_size() -> u64 {
    100
}

fn default_request_batch_size() -> usize {
    10
}

fn default_sinks() -> String {
    "memory".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub rpc_url: String,
    pub start_block: u64,
    pub end_block: u64,
    #[serde(default = "default_process_batch_size")]
    pub process_batch_size: u64,
    #[serde(default = "default_request_batch_size")]
    pub request_batch_size: usize,
    /// Comma-separated entity kinds, e.g. `block,transaction,event`.
    pub entities: String,
    /// Comma-separated sink identifiers, e.g. `postgres,bigquery`.
    #[serde(default = "default_sinks")]
    pub sinks: String,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    pub postgres: Option<PostgresConfig>,
    pub bigquery: Option<BigQueryConfig>,
    pub metadata_api: Option<MetadataApiConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_block > self.end_block {
            return Err(ConfigError::InvalidBlockRange {
                start: self.start_block,
                end: self.end_block,
            });
        }
        if self.process_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize {
                field: "process_batch_size",
            });
        }
        if self.request_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize {
                field: "request_batch_size",
            });
        }
        if self.rate_limit.max_calls == 0 {
            return Err(ConfigError::InvalidBatchSize {
                field: "rate_limit.max_calls",
            });
        }
        if self.entity_kinds()?.is_empty() {
            return Err(ConfigError::NoEntities);
        }
        for sink in self.sink_ids()? {
            match sink {
                SinkId::Postgres if self.postgres.is_none() => {
                    return Err(ConfigError::MissingSinkSection {
                        sink: sink.to_string(),
                        section: "postgres",
                    });
                }
                SinkId::BigQuery if self.bigquery.is_none() => {
                    return Err(ConfigError::MissingSinkSection {
                        sink: sink.to_string(),
                        section: "bigquery",
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn entity_kinds(&self) -> Result<BTreeSet<EntityKind>, ConfigError> {
        split_list(&self.entities)
            .map(EntityKind::from_str)
            .collect()
    }

    pub fn sink_ids(&self) -> Result<Vec<SinkId>, ConfigError> {
        let mut sinks = Vec::new();
        for sink in split_list(&self.sinks).map(SinkId::from_str) {
            let sink = sink?;
            if !sinks.contains(&sink) {
                sinks.push(sink);
            }
        }
        Ok(sinks)
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|item| !item.is_empty())
}

/// Typed record categories produced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    RawBlock,
    Block,
    Transaction,
    Withdrawal,
    RawReceipt,
    Receipt,
    Log,
    Event,
    Transfer,
    Pool,
    Token,
    Account,
    Contract,
    RawTrace,
    Trace,
}

impl EntityKind {
    pub const ALL: [EntityKind; 15] = [
        EntityKind::RawBlock,
        EntityKind::Block,
        EntityKind::Transaction,
        EntityKind::Withdrawal,
        EntityKind::RawReceipt,
        EntityKind::Receipt,
        EntityKind::Log,
        EntityKind::Event,
        EntityKind::Transfer,
        EntityKind::Pool,
        EntityKind::Token,
        EntityKind::Account,
        EntityKind::Contract,
        EntityKind::RawTrace,
        EntityKind::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::RawBlock => "raw_block",
            EntityKind::Block => "block",
            EntityKind::Transaction => "transaction",
            EntityKind::Withdrawal => "withdrawal",
            EntityKind::RawReceipt => "raw_receipt",
            EntityKind::Receipt => "receipt",
            EntityKind::Log => "log",
            EntityKind::Event => "event",
            EntityKind::Transfer => "transfer",
            EntityKind::Pool => "pool",
            EntityKind::Token => "token",
            EntityKind::Account => "account",
            EntityKind::Contract => "contract",
            EntityKind::RawTrace => "raw_trace",
            EntityKind::Trace => "trace",
        }
    }

    /// Table (or stream) name used by sinks.
    pub fn table_name(&self) -> String {
        format!("{}s", self.as_str())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ConfigError;

    // Accepts singular and plural spellings ("block", "blocks").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let singular = normalized.strip_suffix('s').unwrap_or(&normalized);
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == singular)
            .ok_or_else(|| ConfigError::UnknownEntityKind {
                name: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkId {
    Memory,
    Postgres,
    BigQuery,
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SinkId::Memory => "memory",
            SinkId::Postgres => "postgres",
            SinkId::BigQuery => "bigquery",
        })
    }
}

impl FromStr for SinkId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(SinkId::Memory),
            "postgres" | "postgresql" => Ok(SinkId::Postgres),
            "bigquery" => Ok(SinkId::BigQuery),
            _ => Err(ConfigError::UnknownSink {
                name: s.to_string(),
            }),
        }
    }
}

/// How a sink resolves a primary-key collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Ignore,
    Replace,
    None,
}

/// A serialized entity as handed to sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub key: String,
    pub block_number: Option<u64>,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(entities: &str, sinks: &str) -> Config {
        Config {
            rpc_url: "http://localhost:8545".to_string(),
            start_block: 0,
            end_block: 99,
            process_batch_size: 25,
            request_batch_size: 10,
            entities: entities.to_string(),
            sinks: sinks.to_string(),
            rate_limit: RateLimitConfig::default(),
            rpc: RpcConfig::default(),
            postgres: None,
            bigquery: None,
            metadata_api: None,
            metrics: MetricsConfig::default(),
        }
    }

    #[test]
    fn test_entity_kind_parsing() {
        assert_eq!("blocks".parse::<EntityKind>().unwrap(), EntityKind::Block);
        assert_eq!(" Event ".parse::<EntityKind>().unwrap(), EntityKind::Event);
        assert_eq!(
            "raw-receipts".parse::<EntityKind>().unwrap(),
            EntityKind::RawReceipt
        );
        assert!("uncles".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_config_entity_and_sink_lists() {
        let config = config("block, transaction,,event", "memory,memory");
        let kinds = config.entity_kinds().unwrap();
        assert_eq!(
            kinds.into_iter().collect::<Vec<_>>(),
            vec![EntityKind::Block, EntityKind::Transaction, EntityKind::Event]
        );
        assert_eq!(config.sink_ids().unwrap(), vec![SinkId::Memory]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad_range = config("block", "memory");
        bad_range.start_block = 10;
        bad_range.end_block = 5;
        assert!(matches!(
            bad_range.validate(),
            Err(ConfigError::InvalidBlockRange { .. })
        ));

        let missing_section = config("block", "postgres");
        assert!(matches!(
            missing_section.validate(),
            Err(ConfigError::MissingSinkSection { .. })
        ));

        let no_entities = config(" , ", "memory");
        assert!(matches!(no_entities.validate(), Err(ConfigError::NoEntities)));
    }

    #[test]
    fn test_table_names() {
        assert_eq!(EntityKind::RawBlock.table_name(), "raw_blocks");
        assert_eq!(EntityKind::Transaction.table_name(), "transactions");
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::models::common::{ConflictPolicy, EntityKind, PostgresConfig, Record};
use crate::storage::Sink;

// Keeps each statement well under the 65535 bind parameter limit
const INSERT_CHUNK_SIZE: usize = 1_000;

/// Upserting Postgres sink. One table per entity kind, keyed by the record key.
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .context("Failed to connect to Postgres")?;
        info!("Connected to Postgres with up to {} connections", config.max_connections);
        Ok(Self { pool })
    }
}

fn create_table_sql(kind: EntityKind) -> String {
    let table = kind.table_name();
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            block_number BIGINT,
            data JSONB NOT NULL
        )"
    )
}

fn conflict_clause(policy: ConflictPolicy) -> &'static str {
    match policy {
        ConflictPolicy::Replace => {
            " ON CONFLICT (id) DO UPDATE SET block_number = EXCLUDED.block_number, data = EXCLUDED.data"
        }
        ConflictPolicy::Ignore => " ON CONFLICT (id) DO NOTHING",
        ConflictPolicy::None => "",
    }
}

/// A single upsert cannot touch the same key twice, so keep the last record per key.
fn dedupe_chunk(chunk: &[Record]) -> Vec<&Record> {
    let mut last_index = HashMap::with_capacity(chunk.len());
    for (index, record) in chunk.iter().enumerate() {
        last_index.insert(record.key.as_str(), index);
    }
    chunk
        .iter()
        .enumerate()
        .filter(|(index, record)| last_index.get(record.key.as_str()) == Some(index))
        .map(|(_, record)| record)
        .collect()
}

fn insert_query<'a>(kind: EntityKind, rows: &[&'a Record], policy: ConflictPolicy) -> QueryBuilder<'a, Postgres> {
    let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {} (id, block_number, data) ",
        kind.table_name()
    ));

    query_builder.push_values(rows.iter().copied(), |mut b, record| {
        b.push_bind(&record.key)
            .push_bind(record.block_number.map(|n| n as i64))
            .push_bind(sqlx::types::Json(&record.data));
    });

    query_builder.push(conflict_clause(policy));
    query_builder
}

#[async_trait]
impl Sink for PostgresSink {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn prepare(&self, kinds: &BTreeSet<EntityKind>) -> Result<()> {
        for kind in kinds {
            sqlx::query(&create_table_sql(*kind))
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create table for {kind}"))?;
        }
        Ok(())
    }

    async fn insert(&self, kind: EntityKind, records: &[Record], policy: ConflictPolicy) -> Result<usize> {
        let mut count = 0;

        for chunk in records.chunks(INSERT_CHUNK_SIZE) {
            let rows = match policy {
                ConflictPolicy::None => chunk.iter().collect(),
                _ => dedupe_chunk(chunk),
            };

            let result = insert_query(kind, &rows, policy)
                .build()
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to insert into {}", kind.table_name()))?;
            count += result.rows_affected() as usize;
        }

        debug!("Wrote {} row(s) to {}", count, kind.table_name());
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(key: &str, tag: &str) -> Record {
        Record {
            key: key.to_string(),
            block_number: Some(1),
            data: json!({ "tag": tag }),
        }
    }

    #[test]
    fn test_dedupe_keeps_last_record() {
        let chunk = vec![record("a", "first"), record("b", "only"), record("a", "second")];
        let rows = dedupe_chunk(&chunk);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "b");
        assert_eq!(rows[1].data["tag"], "second");
    }

    #[test]
    fn test_insert_query_conflict_clauses() {
        let records = vec![record("a", "x"), record("b", "y")];
        let rows: Vec<&Record> = records.iter().collect();

        let upsert = insert_query(EntityKind::Block, &rows, ConflictPolicy::Replace);
        assert!(upsert.sql().starts_with("INSERT INTO blocks (id, block_number, data) VALUES ($1, $2, $3), ($4, $5, $6)"));
        assert!(upsert.sql().ends_with("data = EXCLUDED.data"));

        let ignore = insert_query(EntityKind::Token, &rows, ConflictPolicy::Ignore);
        assert!(ignore.sql().ends_with("ON CONFLICT (id) DO NOTHING"));

        let strict = insert_query(EntityKind::Token, &rows, ConflictPolicy::None);
        assert!(!strict.sql().contains("ON CONFLICT"));
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(EntityKind::RawReceipt);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS raw_receipts"));
        assert!(sql.contains("data JSONB NOT NULL"));
    }
}

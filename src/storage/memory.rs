use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use crate::models::common::{ConflictPolicy, EntityKind, Record};
use crate::models::errors::ExportError;
use crate::storage::Sink;

/// In-process keyed table per entity kind. Used for dry runs and tests.
pub struct MemorySink {
    name: String,
    policy: ConflictPolicy,
    tables: Mutex<HashMap<EntityKind, BTreeMap<String, Record>>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_policy(name, ConflictPolicy::Replace)
    }

    pub fn with_policy(name: impl Into<String>, policy: ConflictPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub async fn row_count(&self, kind: EntityKind) -> usize {
        self.tables
            .lock()
            .await
            .get(&kind)
            .map(BTreeMap::len)
            .unwrap_or_default()
    }

    /// Rows of `kind` ordered by key.
    pub async fn rows(&self, kind: EntityKind) -> Vec<Record> {
        self.tables
            .lock()
            .await
            .get(&kind)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn conflict_policy(&self) -> ConflictPolicy {
        self.policy
    }

    async fn insert(&self, kind: EntityKind, records: &[Record], policy: ConflictPolicy) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        let table = tables.entry(kind).or_default();

        // Reject the whole batch before touching the table
        if policy == ConflictPolicy::None {
            let mut seen = std::collections::HashSet::new();
            if let Some(record) = records
                .iter()
                .find(|record| table.contains_key(&record.key) || !seen.insert(&record.key))
            {
                return Err(ExportError::DuplicateKey {
                    sink: self.name.clone(),
                    kind,
                    key: record.key.clone(),
                }
                .into());
            }
        }

        let mut written = 0;
        for record in records {
            match policy {
                ConflictPolicy::Ignore if table.contains_key(&record.key) => {}
                _ => {
                    table.insert(record.key.clone(), record.clone());
                    written += 1;
                }
            }
        }

        Ok(written)
    }
}

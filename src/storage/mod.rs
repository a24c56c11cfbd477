pub mod bigquery;
pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info};

use crate::metrics::Metrics;
use crate::models::common::{ConflictPolicy, EntityKind, Record};
use crate::models::errors::ExportError;

/// A destination for serialized entities. Each sink owns its own schema.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Policy applied when a record's key already exists.
    fn conflict_policy(&self) -> ConflictPolicy {
        ConflictPolicy::Replace
    }

    /// Create whatever tables/datasets the sink needs for `kinds`.
    async fn prepare(&self, _kinds: &BTreeSet<EntityKind>) -> Result<()> {
        Ok(())
    }

    /// Insert `records`, returning the number of rows written.
    async fn insert(&self, kind: EntityKind, records: &[Record], policy: ConflictPolicy)
    -> Result<usize>;
}

struct Route {
    sink: Arc<dyn Sink>,
    kinds: BTreeSet<EntityKind>,
}

/// Fans batches of one entity kind out to every sink registered for it.
#[derive(Default)]
pub struct ExportRouter {
    routes: Vec<Route>,
}

impl ExportRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` for `kinds`. Returns the sink's index.
    pub fn register(&mut self, sink: Arc<dyn Sink>, kinds: BTreeSet<EntityKind>) -> usize {
        self.routes.push(Route { sink, kinds });
        self.routes.len() - 1
    }

    /// Every (sink index, kind) pair that receives exports.
    pub fn routes(&self) -> Vec<(usize, EntityKind)> {
        self.routes
            .iter()
            .enumerate()
            .flat_map(|(index, route)| route.kinds.iter().map(move |kind| (index, *kind)))
            .collect()
    }

    pub fn sink_name(&self, index: usize) -> Option<&str> {
        self.routes.get(index).map(|route| route.sink.name())
    }

    pub async fn prepare(&self) -> Result<()> {
        for route in &self.routes {
            route.sink.prepare(&route.kinds).await?;
            info!(
                "Prepared sink '{}' for {} entity kind(s)",
                route.sink.name(),
                route.kinds.len()
            );
        }
        Ok(())
    }

    /// Export to a single sink.
    pub async fn export_to(&self, index: usize, kind: EntityKind, records: &[Record]) -> Result<usize> {
        let route = self.routes.get(index).ok_or(ExportError::UnknownSink(index))?;
        let sink = &route.sink;

        let start = Instant::now();
        let result = sink.insert(kind, records, sink.conflict_policy()).await;

        if let Some(metrics) = Metrics::global() {
            metrics.record_export(
                sink.name(),
                kind,
                *result.as_ref().unwrap_or(&0),
                result.is_err(),
            );
        }

        match &result {
            Ok(rows) => info!(
                "Exported {} {} row(s) to '{}' in {:.2?}",
                rows,
                kind,
                sink.name(),
                start.elapsed()
            ),
            Err(e) => error!("Export of {} {} record(s) to '{}' failed: {:#}", records.len(), kind, sink.name(), e),
        }

        result
    }

}

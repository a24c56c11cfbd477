pub mod api;
pub mod enrichment;
pub mod rpc;
pub mod stages;
pub mod transformations;

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::abi::AbiCodec;
use crate::abi::protocols::SignatureTable;
use crate::indexer::api::MetadataApi;
use crate::indexer::enrichment::MetadataCache;
use crate::indexer::rpc::{ClientSettings, RpcClient};
use crate::models::common::{Config, EntityKind, SinkId};
use crate::scheduler::{RunSummary, Scheduler};
use crate::storage::bigquery::BigQuerySink;
use crate::storage::memory::MemorySink;
use crate::storage::postgres::PostgresSink;
use crate::storage::{ExportRouter, Sink};
use crate::utils::rate_limiter::RateLimiter;

/// Everything the extraction stages share across windows.
pub struct Pipeline {
    client: RpcClient,
    codec: Arc<AbiCodec>,
    signatures: Arc<SignatureTable>,
    cache: MetadataCache,
    metadata_api: Option<MetadataApi>,
    request_batch_size: usize,
}

impl Pipeline {
    pub fn new(client: RpcClient, request_batch_size: usize, metadata_api: Option<MetadataApi>) -> Result<Self> {
        let codec = AbiCodec::new().context("Failed to build ABI codec")?;
        let signatures = SignatureTable::new(&codec).context("Failed to build signature table")?;

        Ok(Self {
            client,
            codec: Arc::new(codec),
            signatures: Arc::new(signatures),
            cache: MetadataCache::new(),
            metadata_api,
            request_batch_size: request_batch_size.max(1),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let url = Url::parse(&config.rpc_url).context("Invalid rpc_url")?;
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.max_calls,
            config.rate_limit.period(),
        ));
        let client = RpcClient::new(url, ClientSettings::from(&config.rpc), limiter)?;
        let metadata_api = config
            .metadata_api
            .as_ref()
            .map(MetadataApi::new)
            .transpose()?;

        Self::new(client, config.request_batch_size, metadata_api)
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }
}

/// Instantiate every configured sink and route the requested kinds to each.
pub async fn build_router(config: &Config) -> Result<ExportRouter> {
    let kinds = config.entity_kinds()?;
    let mut router = ExportRouter::new();

    for sink_id in config.sink_ids()? {
        let sink: Arc<dyn Sink> = match sink_id {
            SinkId::Memory => Arc::new(MemorySink::new("memory")),
            SinkId::Postgres => {
                let postgres = config
                    .postgres
                    .as_ref()
                    .context("postgres sink requires a postgres section")?;
                Arc::new(PostgresSink::connect(postgres).await?)
            }
            SinkId::BigQuery => {
                let bigquery = config
                    .bigquery
                    .as_ref()
                    .context("bigquery sink requires a bigquery section")?;
                Arc::new(BigQuerySink::new(bigquery.clone()))
            }
        };
        router.register(sink, kinds.clone());
    }

    Ok(router)
}

/// Run the configured block range to completion.
pub async fn run(config: &Config) -> Result<RunSummary> {
    let router = build_router(config).await?;
    let pipeline = Pipeline::from_config(config)?;
    run_with(config, pipeline, router).await
}

/// Run with a prebuilt pipeline and router.
pub async fn run_with(config: &Config, pipeline: Pipeline, router: ExportRouter) -> Result<RunSummary> {
    let targets: BTreeSet<EntityKind> = config.entity_kinds()?;

    router.prepare().await.context("Failed to prepare sinks")?;

    let scheduler = Scheduler::new(Arc::new(pipeline), Arc::new(router), &targets);
    info!(
        "Indexing blocks {} to {} in windows of {} ({} kind(s) requested)",
        config.start_block,
        config.end_block,
        config.process_batch_size,
        targets.len()
    );

    let summary = scheduler
        .run(config.start_block, config.end_block, config.process_batch_size)
        .await?;

    info!(
        "Indexed {} blocks in {} window(s)",
        summary.blocks(),
        summary.windows.len()
    );
    Ok(summary)
}

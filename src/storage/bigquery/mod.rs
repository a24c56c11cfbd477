mod schema;

use anyhow::Result;
use async_trait::async_trait;
use google_cloud_bigquery::client::{Client, ClientConfig};
use google_cloud_bigquery::http::{
    dataset::{Dataset, DatasetReference},
    error::Error as BigQueryError,
    table::{Table as BigQueryTable, TableReference},
    tabledata::insert_all::{InsertAllRequest, Row as TableRow},
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::models::common::{BigQueryConfig, ConflictPolicy, EntityKind, Record};
use crate::storage::Sink;
use crate::storage::bigquery::schema::record_schema;
use crate::utils::retry::{RetryConfig, retry};

// BigQuery hard limit & safety margins
const BQ_MAX_BYTES: usize = 10_000_000;
const SAFETY_MARGIN: usize = 512_000;
const MAX_BATCH_BYTES: usize = BQ_MAX_BYTES - SAFETY_MARGIN;
const ROW_OVERHEAD: usize = 200;

#[derive(Serialize)]
struct Row<'a> {
    id: &'a str,
    block_number: Option<u64>,
    // JSON columns are streamed as strings
    data: String,
}

/// Streaming-insert sink. Rows carry their record key as `insertId`, so BigQuery's
/// best-effort dedupe absorbs most replays; delivery is still at-least-once.
pub struct BigQuerySink {
    config: BigQueryConfig,
    client: OnceCell<Arc<(Client, String)>>,
}

impl BigQuerySink {
    pub fn new(config: BigQueryConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    // Initializes the client and project id once per sink
    async fn client(&self) -> Result<Arc<(Client, String)>> {
        self.client
            .get_or_try_init(|| async {
                let (config, project_id) = ClientConfig::new_with_auth().await?;
                let client = Client::new(config).await?;
                let project_id = project_id.ok_or_else(|| anyhow::anyhow!("Project ID not found"))?;
                info!("Initialized BigQuery client for project '{}'", project_id);
                Ok::<_, anyhow::Error>(Arc::new((client, project_id)))
            })
            .await
            .cloned()
    }

    async fn dataset_exists(&self, client: &Client, project_id: &str) -> Result<bool> {
        match client.dataset().get(project_id, &self.config.dataset).await {
            Ok(_) => Ok(true),
            Err(BigQueryError::Response(resp)) if resp.message.contains("Not found") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn table_exists(&self, client: &Client, project_id: &str, table_id: &str) -> Result<bool> {
        match client.table().get(project_id, &self.config.dataset, table_id).await {
            Ok(_) => Ok(true),
            Err(BigQueryError::Response(resp)) if resp.message.contains("Not found") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_dataset(&self) -> Result<()> {
        let (client, project_id) = &*self.client().await?;

        if self.dataset_exists(client, project_id).await? {
            info!("Dataset '{}' already exists", self.config.dataset);
            return Ok(());
        }

        let metadata = Dataset {
            dataset_reference: DatasetReference {
                project_id: project_id.clone(),
                dataset_id: self.config.dataset.clone(),
            },
            location: self.config.location.clone(),
            ..Default::default()
        };

        retry(
            || async {
                match client.dataset().create(&metadata).await {
                    Ok(_) => {
                        info!("Created dataset '{}' in project '{}'", self.config.dataset, project_id);
                        Ok(())
                    }
                    Err(BigQueryError::Response(resp)) if resp.message.contains("Already Exists") => Ok(()),
                    Err(e) => Err(e.into()),
                }
            },
            &RetryConfig::default(),
            "create_dataset",
        )
        .await
    }

    async fn create_table(&self, kind: EntityKind) -> Result<()> {
        let (client, project_id) = &*self.client().await?;
        let table_id = kind.table_name();

        if self.table_exists(client, project_id, &table_id).await? {
            info!("Table '{}.{}' already exists", self.config.dataset, table_id);
            return Ok(());
        }

        let metadata = BigQueryTable {
            table_reference: TableReference {
                project_id: project_id.clone(),
                dataset_id: self.config.dataset.clone(),
                table_id: table_id.clone(),
            },
            schema: Some(record_schema()),
            ..Default::default()
        };

        retry(
            || async {
                match client.table().create(&metadata).await {
                    Ok(_) => {
                        info!("Created table '{}.{}'", self.config.dataset, table_id);
                        Ok(())
                    }
                    Err(BigQueryError::Response(resp)) if resp.message.contains("Already Exists") => Ok(()),
                    Err(e) => Err(e.into()),
                }
            },
            &RetryConfig::default(),
            "create_table",
        )
        .await
    }

    async fn flush_batch(&self, client: &Client, project_id: &str, table_id: &str, batch: &[Row<'_>]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let request = InsertAllRequest {
            skip_invalid_rows: Some(false),
            ignore_unknown_values: Some(false),
            template_suffix: None,
            rows: batch
                .iter()
                .map(|row| TableRow {
                    insert_id: Some(row.id.to_string()),
                    json: row,
                })
                .collect(),
            trace_id: None,
        };

        retry(
            || async {
                let response = client
                    .tabledata()
                    .insert(project_id, &self.config.dataset, table_id, &request)
                    .await?;
                match response.insert_errors {
                    Some(errors) if !errors.is_empty() => Err(anyhow::anyhow!("Insert errors: {:?}", errors)),
                    _ => Ok(()),
                }
            },
            &RetryConfig::default(),
            "insert_rows",
        )
        .await
    }
}

/// Split rows into batches whose estimated request size stays under the streaming
/// insert limit. A row larger than the limit travels alone.
fn size_batches<'a>(rows: Vec<Row<'a>>) -> Vec<Vec<Row<'a>>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0;

    for row in rows {
        let size = row.id.len() + row.data.len() + ROW_OVERHEAD;
        if !current.is_empty() && current_size + size > MAX_BATCH_BYTES {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(row);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[async_trait]
impl Sink for BigQuerySink {
    fn name(&self) -> &str {
        "bigquery"
    }

    fn conflict_policy(&self) -> ConflictPolicy {
        ConflictPolicy::None
    }

    async fn prepare(&self, kinds: &BTreeSet<EntityKind>) -> Result<()> {
        self.create_dataset().await?;
        for kind in kinds {
            self.create_table(*kind).await?;
        }
        Ok(())
    }

    async fn insert(&self, kind: EntityKind, records: &[Record], _policy: ConflictPolicy) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let (client, project_id) = &*self.client().await?;
        let table_id = kind.table_name();

        let rows = records
            .iter()
            .map(|record| {
                Ok(Row {
                    id: &record.key,
                    block_number: record.block_number,
                    data: serde_json::to_string(&record.data)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let batches = size_batches(rows);
        let batch_count = batches.len();
        for batch in &batches {
            self.flush_batch(client, project_id, &table_id, batch).await?;
        }

        info!(
            "Streamed {} rows into {}.{}.{} in {} batch(es)",
            records.len(),
            project_id,
            self.config.dataset,
            table_id,
            batch_count
        );
        Ok(records.len())
    }
}

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::info;

use axum::{Router, routing::get};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;

use crate::models::common::EntityKind;

static METRICS: OnceCell<Metrics> = OnceCell::new();

pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,

    // Block processing metrics
    pub blocks_processed: Counter<u64>,
    pub latest_processed_block: Gauge<u64>,
    pub window_duration: Histogram<f64>,

    // RPC metrics
    pub rpc_requests: Counter<u64>,
    pub rpc_errors: Counter<u64>,
    pub rpc_retries: Counter<u64>,
    pub rpc_latency: Histogram<f64>,
    pub rate_limiter_wait: Histogram<f64>,

    // Extraction and export metrics
    pub decode_failures: Counter<u64>,
    pub entities_exported: Counter<u64>,
    pub export_errors: Counter<u64>,
}

impl Metrics {
    fn new() -> Result<Self, MetricError> {
        // Create a new prometheus registry
        let registry = prometheus::Registry::new();

        // Configure OpenTelemetry to use this registry
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        // Set up a meter to create instruments
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("etl_metrics");

        let blocks_processed = meter
            .u64_counter("etl_blocks_processed")
            .with_description("Total number of blocks processed")
            .build();

        let latest_processed_block = meter
            .u64_gauge("etl_latest_processed_block_number")
            .with_description("Last block of the latest completed window")
            .build();

        let window_duration = meter
            .f64_histogram("etl_window_duration")
            .with_description("Time spent fetching, deriving and exporting one batch window")
            .with_unit("s")
            .build();

        let rpc_requests = meter
            .u64_counter("etl_rpc_requests")
            .with_description("Number of JSON-RPC batch requests made")
            .build();

        let rpc_errors = meter
            .u64_counter("etl_rpc_errors")
            .with_description("Number of failed JSON-RPC batch attempts")
            .build();

        let rpc_retries = meter
            .u64_counter("etl_rpc_retries")
            .with_description("Number of JSON-RPC batch attempts beyond the first")
            .build();

        let rpc_latency = meter
            .f64_histogram("etl_rpc_latency")
            .with_description("JSON-RPC batch request latency")
            .with_boundaries(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 5.0, 10.0,
            ])
            .with_unit("s")
            .build();

        let rate_limiter_wait = meter
            .f64_histogram("etl_rate_limiter_wait")
            .with_description("Time spent waiting for a rate limiter grant")
            .with_unit("s")
            .build();

        let decode_failures = meter
            .u64_counter("etl_decode_failures")
            .with_description("Logs skipped because their payload could not be decoded")
            .build();

        let entities_exported = meter
            .u64_counter("etl_entities_exported")
            .with_description("Records delivered to sinks")
            .build();

        let export_errors = meter
            .u64_counter("etl_export_errors")
            .with_description("Failed sink deliveries")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            blocks_processed,
            latest_processed_block,
            window_duration,
            rpc_requests,
            rpc_errors,
            rpc_retries,
            rpc_latency,
            rate_limiter_wait,
            decode_failures,
            entities_exported,
            export_errors,
        })
    }

    /// Install the process-wide metrics instance. Calling it twice returns the first one.
    pub fn init() -> Result<&'static Metrics> {
        METRICS
            .get_or_try_init(Metrics::new)
            .context("failed to initialize metrics")
    }

    /// Metrics are optional; every recording site goes through this.
    pub fn global() -> Option<&'static Metrics> {
        METRICS.get()
    }

    pub fn record_rpc_request(&self, method: &str, latency: f64, is_error: bool, attempt: u32) {
        let labels = [KeyValue::new("method", method.to_string())];
        self.rpc_requests.add(1, &labels);
        self.rpc_latency.record(latency, &labels);
        if is_error {
            self.rpc_errors.add(1, &labels);
        }
        if attempt > 1 {
            self.rpc_retries.add(1, &labels);
        }
    }

    pub fn record_rate_limiter_wait(&self, seconds: f64) {
        self.rate_limiter_wait.record(seconds, &[]);
    }

    pub fn record_decode_failure(&self, kind: EntityKind) {
        self.decode_failures
            .add(1, &[KeyValue::new("kind", kind.as_str())]);
    }

    pub fn record_export(&self, sink: &str, kind: EntityKind, rows: usize, is_error: bool) {
        let labels = [
            KeyValue::new("sink", sink.to_string()),
            KeyValue::new("kind", kind.as_str()),
        ];
        if is_error {
            self.export_errors.add(1, &labels);
        } else {
            self.entities_exported.add(rows as u64, &labels);
        }
    }

    pub fn record_window(&self, blocks: u64, last_block: u64, seconds: f64) {
        self.blocks_processed.add(blocks, &[]);
        self.latest_processed_block.record(last_block, &[]);
        self.window_duration.record(seconds, &[]);
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> Result<()> {
        let addr = format!("{addr}:{port}")
            .parse::<SocketAddr>()
            .context("invalid metrics address")?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Determine the access URL based on the binding address. Only used for logging.
        let access_url = if addr.ip().to_string() == "0.0.0.0" {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind metrics server")?;

        // Spawn the server in a separate task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Metrics server stopped: {}", e);
            }
        });

        Ok(())
    }
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# failed to encode metrics: {e}");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

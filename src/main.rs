use anyhow::{Result, anyhow};
use tokio::signal;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

use evm_etl::indexer;
use evm_etl::metrics::Metrics;
use evm_etl::utils::load_config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!();
    info!("=========================== INITIALIZING ===========================");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Err(anyhow!(e));
        }
    };

    if config.metrics.enabled {
        let metrics = Metrics::init()?;
        metrics
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await?;
    } else {
        info!("Metrics are disabled");
    }

    info!("============================ INDEXING ==============================");
    let start = Instant::now();

    tokio::select! {
        result = indexer::run(&config) => {
            match result {
                Ok(summary) => {
                    info!(
                        "Finished {} blocks in {} window(s) (took {:.2?})",
                        summary.blocks(),
                        summary.windows.len(),
                        start.elapsed()
                    );
                    Ok(())
                }
                Err(e) => {
                    error!("Indexing failed: {:#}", e);
                    Err(e)
                }
            }
        }
        _ = signal::ctrl_c() => {
            // Completed windows are already exported; a rerun of the range is idempotent
            info!("Received Ctrl+C signal, shutting down");
            Ok(())
        }
    }
}

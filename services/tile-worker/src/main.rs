//! LIDAR chunk tile worker.
//!
//! Leases chunks from the coordination API and, for each one:
//! - Downloads its point-cloud sources
//! - Runs the terrain renderer until every input has an output
//! - Mosaics, resamples and retiles the rendered rasters
//! - Uploads the tiles and releases the lease

mod config_loader;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pipeline::{PipelineContext, Worker, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "tile-worker")]
#[command(about = "Produces map tiles from leased LIDAR chunks")]
struct Args {
    /// Worker configuration file (YAML)
    #[arg(long, env = "TILE_WORKER_CONFIG")]
    config: Option<PathBuf>,

    /// Process one batch and exit (vs continuous polling)
    #[arg(long)]
    once: bool,

    /// Only lease chunks from this area
    #[arg(long, env = "AREA_NAME")]
    area: Option<String>,

    /// Chunks processed concurrently
    #[arg(long, env = "CONCURRENT_CHUNKS")]
    concurrent_chunks: Option<usize>,

    /// Parent directory of the per-chunk working directories
    #[arg(long, env = "WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,
}

impl Args {
    /// Command-line values take precedence over the configuration file.
    fn apply(&self, config: &mut WorkerConfig) {
        if let Some(area) = &self.area {
            config.pipeline.area = Some(area.clone());
        }
        if let Some(n) = self.concurrent_chunks {
            config.pipeline.concurrent_chunks = n;
        }
        if let Some(dir) = &self.work_dir {
            config.pipeline.work_root = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting tile worker");

    if let Some(port) = args.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port, "Serving metrics");
    }

    let mut config = match &args.config {
        Some(path) => config_loader::load_worker_config(path)?,
        None => WorkerConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    tokio::fs::create_dir_all(&config.pipeline.work_root).await?;

    info!(
        bucket = %config.storage.bucket,
        lease_api = %config.lease_api.base_url,
        area = config.pipeline.area.as_deref().unwrap_or("any"),
        concurrent_chunks = config.pipeline.concurrent_chunks,
        "Configuration loaded"
    );

    let ctx = Arc::new(PipelineContext::from_config(config)?);
    let worker = Worker::new(ctx);

    if args.once {
        info!("Running single batch");
        let summary = worker.run_batch().await?;
        info!(
            leased = summary.leased,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Worker session complete"
        );
    } else {
        info!("Starting continuous polling");

        // Shutdown signal
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        // Handle Ctrl+C
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal, finishing current batch");
            shutdown_tx_clone.send(()).ok();
        });

        worker.run_forever(shutdown_tx.subscribe()).await;
    }

    Ok(())
}

//! Parking monitor service.
//!
//! Polls the bay camera, reads plates from periodic snapshots and pushes each
//! plate's payment status to the gate display.
//!
//! # Architecture
//!
//! ```text
//! MJPEG Stream -> AcquisitionLoop -> Plate Recognizer -> Reconciler -> Display / SQLite
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with PARKWATCH_)
//!
//! See `config.rs` for detailed configuration options.

use anyhow::Context;
use parkwatch_monitor::config::{LoggingConfig, MonitorConfig};
use parkwatch_monitor::{
    AcquisitionLoop, AcquisitionSettings, HttpNotifier, LoopExit, MjpegStream, ParkingStore,
    RecognitionClient, Reconciler, SnapshotWriter, SystemClock,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_config()?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = "parkwatch-monitor",
        version = env!("CARGO_PKG_VERSION"),
        camera = %config.camera.stream_url,
        "Starting parking monitor"
    );

    // Validate configuration
    config.validate().context("Invalid configuration")?;

    if config.health.enable_metrics {
        init_metrics(config.health.port)?;
    }

    let store = Arc::new(
        ParkingStore::connect(&config.storage, config.registry.match_mode)
            .await
            .context("Failed to open parking database")?,
    );

    // Run the monitor; the database is closed whatever the outcome
    let result = run_monitor(&config, store.clone()).await;
    store.close().await;

    match result {
        Ok(()) => {
            info!("Parking monitor stopped");
        }
        Err(e) => {
            error!(error = %e, "Parking monitor failed");
            return Err(e);
        }
    }

    Ok(())
}

/// Load configuration, falling back to the environment alone.
fn load_config() -> anyhow::Result<MonitorConfig> {
    let config = MonitorConfig::load().or_else(|e| {
        warn!(error = %e, "Failed to load config from files, trying environment");
        MonitorConfig::from_env()
    })?;

    Ok(config)
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_level(&config.level);

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("parkwatch_monitor={}", level).parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("reqwest=info".parse()?)
        .add_directive("hyper=info".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .init();
    }

    Ok(())
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wire up the pipeline and run the acquisition loop until it exits.
async fn run_monitor(config: &MonitorConfig, store: Arc<ParkingStore>) -> anyhow::Result<()> {
    store
        .run_migrations()
        .await
        .context("Failed to run database migrations")?;

    if config.storage.seed_demo_registry {
        if let Err(e) = store.seed_demo_registry().await {
            warn!(error = %e, "Failed to seed demo payment registry");
        }
    }

    match store.count_logs().await {
        Ok(entries) => info!(entries, "Parking log opened"),
        Err(e) => warn!(error = %e, "Failed to count parking log entries"),
    }

    let writer = SnapshotWriter::new(&config.storage.snapshot_dir)
        .await
        .context("Failed to prepare snapshot directory")?;

    let recognizer = Arc::new(
        RecognitionClient::new(&config.recognition)
            .context("Failed to create recognition client")?,
    );
    let notifier =
        Arc::new(HttpNotifier::new(&config.notifier).context("Failed to create notifier")?);
    let reconciler = Reconciler::new(store.clone(), store, notifier);

    let stream = MjpegStream::new(config.camera.clone()).context("Failed to create camera client")?;
    info!(url = %stream.url(), "Opening camera stream...");

    let mut acquisition = AcquisitionLoop::new(
        stream,
        writer,
        recognizer,
        reconciler,
        Arc::new(SystemClock),
        AcquisitionSettings::from_config(config),
    );

    // Cancel the loop on Ctrl+C or SIGTERM
    let shutdown = CancellationToken::new();
    let signal_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Initiating graceful shutdown...");
            shutdown.cancel();
        }
    });

    let exit = acquisition.run(shutdown).await;
    signal_handle.abort();

    log_final_stats(&acquisition);

    match exit {
        LoopExit::Shutdown => Ok(()),
        LoopExit::StreamUnavailable(e) => {
            Err(anyhow::Error::new(e).context("Camera stream could not be opened"))
        }
        LoopExit::StreamLost(e) => {
            Err(anyhow::Error::new(e).context("Camera stream lost and could not be reopened"))
        }
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

/// Log final statistics on shutdown.
fn log_final_stats(acquisition: &AcquisitionLoop<MjpegStream>) {
    info!("=== Final Statistics ===");

    let stream = acquisition.source().stats();
    info!(
        frames_received = stream.frames_received,
        bytes_received = stream.bytes_received,
        reconnect_count = stream.reconnect_count,
        "Camera final stats"
    );

    acquisition.log_stats();
}

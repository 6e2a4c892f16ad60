//! mqflux bridge daemon.
//!
//! This is the main entry point for the MQTT to InfluxDB bridge. It
//! subscribes to the configured broker topics, persists every well-formed
//! payload in the durable queue, and forwards queued records to InfluxDB.
//!
//! # Usage
//!
//! ```bash
//! # Run with a config file
//! mqflux-bridge --config /etc/mqflux/config.yaml
//!
//! # Override the queue location and write pacing
//! mqflux-bridge --config config.yaml \
//!     --data-dir /var/lib/mqflux \
//!     --throttle-ms 500
//! ```
//!
//! # Shutdown
//!
//! The daemon handles SIGINT (Ctrl+C) and SIGTERM: the ingestion worker
//! disconnects from the broker, the egestion worker finishes its current
//! iteration and exits, and anything still queued stays on disk for the next
//! run.

use anyhow::{Context, Result};
use clap::Parser;
use metrics::gauge;
use mqflux_bridge::{
    enqueue_payload, BridgeConfig, ForwarderConfig, InfluxForwarder, InfluxWriter, MqttSource,
    StoreCoordinator,
};
use mqflux_core::metrics::{init_metrics, start_metrics_server};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// mqflux bridge daemon.
#[derive(Parser, Debug)]
#[command(name = "mqflux-bridge")]
#[command(about = "Durable MQTT to InfluxDB bridge daemon")]
#[command(version)]
struct Args {
    /// YAML configuration file
    #[arg(long, short)]
    config: PathBuf,

    /// Queue data directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Minimum delay between sink writes, in milliseconds
    #[arg(long, default_value = "300")]
    throttle_ms: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,

    /// Enable debug logging (overrides the config file)
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = BridgeConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(data_dir) = args.data_dir {
        config.queue.data_dir = data_dir;
    }

    // Initialize tracing
    let mut filter = EnvFilter::from_default_env().add_directive("info".parse().unwrap());
    if args.verbose || config.verbosity {
        filter = filter
            .add_directive("mqflux_bridge=debug".parse().unwrap())
            .add_directive("mqflux_core=debug".parse().unwrap());
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("mqflux bridge starting...");

    // Initialize metrics
    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
        gauge!("bridge_running").set(1.0);
    }

    let store_path = config.queue.store_path();

    tracing::info!("Configuration:");
    tracing::info!("  Broker: {}:{}", config.mqtt.host, config.mqtt.port);
    tracing::info!("  Topics: {:?}", config.mqtt.topics);
    tracing::info!(
        "  Sink: {} (org={}, bucket={})",
        config.influx.url(),
        config.influx.organization,
        config.influx.bucket
    );
    tracing::info!("  Queue store: {}", store_path.display());

    // Each worker opens the shared store through the coordinator; the first
    // open initializes the on-disk structures.
    let coordinator = StoreCoordinator::new();
    let egest_queue = coordinator
        .guarded_open(&store_path)
        .with_context(|| format!("Failed to open queue store at {}", store_path.display()))?;
    let ingest_queue = coordinator
        .guarded_open(&store_path)
        .with_context(|| format!("Failed to open queue store at {}", store_path.display()))?;

    if !egest_queue.is_empty() {
        tracing::info!("{} records queued from a previous run", egest_queue.len());
    }

    // Start the egestion worker
    let writer = InfluxWriter::new(&config.influx)?;
    let forwarder = InfluxForwarder::new(
        writer,
        ForwarderConfig {
            throttle: Duration::from_millis(args.throttle_ms),
        },
    );
    let forwarder_handle = forwarder.start(egest_queue.clone());

    // Set up graceful shutdown
    let source = Arc::new(MqttSource::new(config.mqtt.clone()));
    {
        let source = Arc::clone(&source);
        ctrlc::set_handler(move || {
            tracing::info!("Shutdown signal received, stopping gracefully...");
            source.stop();
        })
        .context("Failed to set Ctrl+C handler")?;
    }

    // Run the ingestion loop
    let mut records_enqueued = 0usize;
    let mut messages_rejected = 0usize;

    tracing::info!("Starting ingestion...");
    let run_result = source
        .run(|topic, payload| {
            if enqueue_payload(&ingest_queue, topic, payload)? {
                records_enqueued += 1;
            } else {
                messages_rejected += 1;
            }
            Ok(true)
        })
        .await;

    // Shutdown sequence
    tracing::info!("Shutting down...");
    forwarder.stop();
    if forwarder_handle.join().is_err() {
        tracing::warn!("Egestion worker thread panicked");
    }

    gauge!("bridge_running").set(0.0);

    let forward_stats = forwarder.stats();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");

    let stats = match run_result {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("Ingestion worker failed: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Messages received:   {}", stats.messages_received);
    tracing::info!("Records enqueued:    {}", records_enqueued);
    tracing::info!("Messages rejected:   {}", messages_rejected);
    tracing::info!("Broker reconnects:   {}", stats.reconnects);
    tracing::info!("Records forwarded:   {}", forward_stats.records_forwarded);
    tracing::info!("Sink write failures: {}", forward_stats.write_failures);
    tracing::info!("Still queued:        {}", egest_queue.len());

    Ok(())
}

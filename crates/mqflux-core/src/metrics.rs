//! Prometheus metrics helpers for the mqflux bridge.
//!
//! This module provides centralized metrics initialization and the metric
//! definitions used across the bridge.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mqflux_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     use metrics::counter;
//!     counter!("ingest_messages_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: pipeline stage (`ingest_`, `queue_`, `forward_`)
//! - Suffix: unit or type (`_total`, `_depth`)

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already
/// installed, instead of panicking. Useful for tests.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the specified port. This spawns a
/// background task and returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server failed: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics used across the bridge.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Ingestion Metrics
    // =========================================================================

    describe_counter!(
        "ingest_messages_total",
        "Total messages received from the broker"
    );
    describe_counter!(
        "ingest_messages_rejected_total",
        "Malformed payloads discarded at ingestion"
    );
    describe_counter!(
        "ingest_records_enqueued_total",
        "Well-formed records written to the durable queue"
    );
    describe_counter!(
        "ingest_reconnects_total",
        "Broker connection losses observed by the ingestion worker"
    );

    // =========================================================================
    // Queue Metrics
    // =========================================================================

    describe_gauge!(
        "queue_depth",
        "Records currently held in the durable queue"
    );

    // =========================================================================
    // Egestion Metrics
    // =========================================================================

    describe_counter!(
        "forward_records_total",
        "Records successfully written to the sink"
    );
    describe_counter!(
        "forward_write_failures_total",
        "Sink write attempts that failed (records dropped, not retried)"
    );

    describe_gauge!(
        "bridge_running",
        "Whether the bridge is currently running (1=yes, 0=no)"
    );
}

/// Increment a counter.
///
/// Convenience wrapper around `metrics::counter!`.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
///
/// Convenience wrapper around `metrics::gauge!`.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

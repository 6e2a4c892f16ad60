//! InfluxDB egestion worker.
//!
//! This module provides the [`InfluxWriter`], a thin client for the InfluxDB
//! v2 write API, and the [`InfluxForwarder`], the worker that drains the
//! durable queue into it.
//!
//! # Forwarding Policy
//!
//! The forwarder stamps each record with the wall clock at write time, not
//! any event time from the payload. A failed write is logged and the record
//! is dropped: it was already removed from the queue by `get`, and no requeue
//! or retry happens at this boundary. The fixed inter-iteration delay is a
//! throttle to avoid overwhelming the sink, not a backpressure signal.

use crate::config::InfluxConfig;
use crate::error::{Error, Result};
use crate::queue::DurableQueue;
use chrono::Utc;
use mqflux_core::Record;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// Default pacing delay between forward iterations.
const DEFAULT_THROTTLE: Duration = Duration::from_millis(300);

/// How long one queue wait lasts before the running flag is rechecked.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the egestion worker.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Minimum delay between forward iterations.
    pub throttle: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            throttle: DEFAULT_THROTTLE,
        }
    }
}

/// Client for the InfluxDB v2 write API.
#[derive(Clone)]
pub struct InfluxWriter {
    client: reqwest::Client,
    url: String,
    org: String,
    bucket: String,
    token: String,
}

impl InfluxWriter {
    /// Create a writer for the given sink configuration.
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        info!(
            "InfluxDB writer initialized: url={}, org={}, bucket={}",
            config.url(),
            config.organization,
            config.bucket
        );

        Ok(Self {
            client,
            url: config.url(),
            org: config.organization.clone(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
        })
    }

    /// Write a batch of records, all stamped with the same timestamp.
    ///
    /// The batch succeeds or fails atomically at the sink. Non-2xx responses
    /// become [`Error::SinkWrite`] with the status and response body.
    pub async fn write_records(&self, records: &[Record], timestamp_ns: u64) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(encode_batch(records, timestamp_ns))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::SinkWrite(format!("status {}: {}", status, detail)));
        }

        Ok(())
    }

    /// Check if the sink is reachable.
    pub async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/health", self.url))
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

/// Encode a batch of records as a Line Protocol request body.
fn encode_batch(records: &[Record], timestamp_ns: u64) -> String {
    records
        .iter()
        .map(|record| record.to_line_protocol(timestamp_ns))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Nanoseconds since the Unix epoch, now.
fn now_ns() -> u64 {
    Utc::now().timestamp_nanos_opt().map_or(0, |ns| ns as u64)
}

/// Egestion worker that drains the durable queue into InfluxDB.
pub struct InfluxForwarder {
    writer: InfluxWriter,
    config: ForwarderConfig,
    running: Arc<AtomicBool>,
    counters: Arc<ForwarderCounters>,
}

/// Shared counters between the worker thread and `stats()`.
#[derive(Default)]
struct ForwarderCounters {
    records_forwarded: AtomicUsize,
    write_failures: AtomicUsize,
}

impl InfluxForwarder {
    /// Create a new forwarder.
    pub fn new(writer: InfluxWriter, config: ForwarderConfig) -> Self {
        Self {
            writer,
            config,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(ForwarderCounters::default()),
        }
    }

    /// Start the worker, draining the given queue in a background thread
    /// until [`stop`] is called.
    ///
    /// [`stop`]: InfluxForwarder::stop
    pub fn start(&self, queue: DurableQueue) -> thread::JoinHandle<()> {
        let writer = self.writer.clone();
        let throttle = self.config.throttle;
        let running = Arc::clone(&self.running);
        let counters = Arc::clone(&self.counters);

        self.running.store(true, Ordering::SeqCst);

        thread::spawn(move || {
            info!("Egestion worker started");

            // One record per iteration is a synchronous write; a small
            // runtime on this thread carries the async HTTP client.
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("Failed to create tokio runtime");

            while running.load(Ordering::SeqCst) {
                match queue.get_timeout(DEQUEUE_TIMEOUT) {
                    Ok(Some(record)) => {
                        let timestamp_ns = now_ns();
                        let batch = std::slice::from_ref(&record);

                        match rt.block_on(writer.write_records(batch, timestamp_ns)) {
                            Ok(()) => {
                                counters.records_forwarded.fetch_add(1, Ordering::Relaxed);
                                metrics::counter!("forward_records_total").increment(1);
                                debug!("Record forwarded to sink");
                            }
                            Err(e) => {
                                // The record is already dequeued: dropped,
                                // not requeued, not retried.
                                counters.write_failures.fetch_add(1, Ordering::Relaxed);
                                metrics::counter!("forward_write_failures_total").increment(1);
                                error!("Sink write failed, record dropped: {}", e);
                            }
                        }

                        metrics::gauge!("queue_depth").set(queue.len() as f64);
                        thread::sleep(throttle);
                    }
                    // Empty: recheck the running flag and keep waiting.
                    Ok(None) => {}
                    Err(e) => {
                        error!("Queue read failed, stopping egestion worker: {}", e);
                        break;
                    }
                }
            }

            info!("Egestion worker stopped");
        })
    }

    /// Stop the worker.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Get statistics about the worker.
    pub fn stats(&self) -> ForwarderStats {
        ForwarderStats {
            records_forwarded: self.counters.records_forwarded.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
            is_running: self.running.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about the egestion worker.
#[derive(Debug, Clone)]
pub struct ForwarderStats {
    /// Records successfully written to the sink.
    pub records_forwarded: usize,

    /// Write attempts that failed; each one dropped a record.
    pub write_failures: usize,

    /// Whether the worker is running.
    pub is_running: bool,
}

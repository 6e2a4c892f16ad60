//! Core pipeline components for the bridge.
//!
//! ```text
//! [MqttSource] → enqueue_payload → [DurableQueue] → [InfluxForwarder]
//!                                        ↓
//!                                     RocksDB
//! ```
//!
//! The queue is the source of truth between the two workers: a record is
//! at-least-once up to the moment the forwarder dequeues it, and
//! at-most-once after.

mod influx;

pub use influx::{ForwarderConfig, ForwarderStats, InfluxForwarder, InfluxWriter};

use crate::error::Result;
use crate::queue::DurableQueue;
use mqflux_core::Record;
use tracing::{debug, warn};

/// Ingest one inbound payload: parse, and enqueue if well-formed.
///
/// Returns `Ok(true)` when a record was enqueued, `Ok(false)` when the
/// payload was malformed and discarded (the queue is untouched). A queue
/// `put` failure is returned as an error: the caller must treat it as fatal,
/// because ingestion cannot guarantee durability anymore.
pub fn enqueue_payload(queue: &DurableQueue, topic: &str, payload: &[u8]) -> Result<bool> {
    let record = match Record::from_payload(payload) {
        Ok(record) => record,
        Err(e) => {
            warn!("Message received from {} is malformed, discarded: {}", topic, e);
            metrics::counter!("ingest_messages_rejected_total").increment(1);
            return Ok(false);
        }
    };

    queue.put(&record)?;
    metrics::counter!("ingest_records_enqueued_total").increment(1);
    metrics::gauge!("queue_depth").set(queue.len() as f64);
    debug!("Record from {} enqueued", topic);
    Ok(true)
}

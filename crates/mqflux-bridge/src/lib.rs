//! mqflux bridge pipeline components.
//!
//! This crate provides the durable decoupling pipeline between an MQTT
//! broker and InfluxDB.
//!
//! # Modules
//!
//! - [`queue`] - Disk-backed FIFO queue and the open coordinator
//! - [`source`] - MQTT subscription lifecycle and message delivery
//! - [`pipeline`] - Payload ingestion and the InfluxDB egestion worker
//! - [`config`] - YAML configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   MqttSource    │  subscribes, reconnects, resubscribes
//! └────────┬────────┘
//!          │ (topic, payload)
//!          ▼
//! ┌─────────────────┐
//! │ enqueue_payload │  parse; malformed payloads discarded here
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  DurableQueue   │  RocksDB - survives restarts, FIFO
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ InfluxForwarder │  dequeue, stamp "now", write, throttle
//! └─────────────────┘
//! ```
//!
//! The queue is the hand-off point: the ingestion worker is the sole
//! producer, the egestion worker the sole consumer, and both sides fail
//! independently of each other.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod source;

// Re-export commonly used types at crate root
pub use config::{BridgeConfig, InfluxConfig, MqttConfig, QueueConfig, STORE_NAME};
pub use error::{Error, Result};
pub use pipeline::{
    enqueue_payload, ForwarderConfig, ForwarderStats, InfluxForwarder, InfluxWriter,
};
pub use queue::coordinator::StoreCoordinator;
pub use queue::DurableQueue;
pub use source::{ConnectionState, MqttSource, SourceStats};

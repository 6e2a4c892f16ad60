//! Error types for the bridge daemon.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while bridging messages.
#[derive(Error, Debug)]
pub enum Error {
    /// RocksDB error from the durable queue store.
    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    /// The queue store's on-disk structure is inconsistent.
    #[error("queue store corrupt: {0}")]
    Corrupt(String),

    /// Inbound payload failed well-formedness checks.
    #[error("malformed payload: {0}")]
    Payload(#[from] mqflux_core::Error),

    /// MQTT client request error (subscribe, disconnect).
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// HTTP transport error talking to the sink.
    #[error("sink transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The sink accepted the connection but rejected the write.
    #[error("sink write rejected: {0}")]
    SinkWrite(String),

    /// Record encoding error (queue persistence).
    #[error("record encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] serde_yaml::Error),
}

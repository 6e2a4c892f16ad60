//! Inbound message source.
//!
//! The bridge consumes the broker through a narrow contract: the source
//! delivers `(topic, payload)` pairs to a registered handler and owns the
//! whole subscription lifecycle (connect, subscribe, reconnect, resubscribe).
//! Payload interpretation happens on the other side of the handler, so the
//! transport policy stays decoupled from the pipeline.

mod mqtt;

pub use mqtt::{ConnectionState, MqttSource};

/// Statistics from running a message source.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    /// Total messages delivered to the handler.
    pub messages_received: usize,

    /// Transport-level connection losses observed.
    pub reconnects: usize,
}

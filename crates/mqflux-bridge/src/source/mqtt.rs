//! MQTT broker source.
//!
//! Connects to the broker with rumqttc and streams PUBLISH payloads to the
//! registered handler. The event loop reconnects on its own after a transport
//! fault; subscriptions do not survive a reconnect, so every CONNACK triggers
//! a fresh SUBSCRIBE for all configured topics.
//!
//! # Connection State Machine
//!
//! ```text
//! Disconnected → Connecting → Subscribed → Receiving
//!                    ↑                         │
//!                    └────── Reconnecting ←────┘
//! ```
//!
//! `Disconnected` is the initial state and the terminal state after an
//! explicit shutdown; `Reconnecting` is entered on any transport fault and
//! leaves through the next successful CONNACK.

use super::SourceStats;
use crate::config::MqttConfig;
use crate::error::Result;
use rumqttc::{AsyncClient, ConnAck, ConnectReturnCode, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delay before re-polling the event loop after a transport fault, so a dead
/// broker doesn't spin the loop.
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// How long one poll waits before checking the shutdown flag.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// States of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session. Initial state, and terminal after shutdown.
    Disconnected,
    /// Session requested, CONNACK not yet seen.
    Connecting,
    /// CONNACK accepted; SUBSCRIBE requests issued.
    Subscribed,
    /// SUBACK seen; payloads are flowing.
    Receiving,
    /// Transport fault observed; the event loop is retrying.
    Reconnecting,
}

/// Live MQTT message source.
pub struct MqttSource {
    config: MqttConfig,
    running: AtomicBool,
    state: parking_lot::Mutex<ConnectionState>,
    messages_received: AtomicUsize,
    reconnects: AtomicUsize,
}

impl MqttSource {
    /// Create a new source for the given broker configuration.
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            running: AtomicBool::new(false),
            state: parking_lot::Mutex::new(ConnectionState::Disconnected),
            messages_received: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Signal the source to stop processing.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the source is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current state of the broker session.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Run the source, delivering each PUBLISH payload to the handler.
    ///
    /// The handler receives `(topic, payload)` and returns `Ok(true)` to
    /// continue, `Ok(false)` to stop gracefully, or `Err` to abort the worker
    /// (used for storage faults: stop rather than silently drop). The broker
    /// connection is closed on every exit path, error or not.
    pub async fn run<F>(&self, handler: F) -> Result<SourceStats>
    where
        F: FnMut(&str, &[u8]) -> Result<bool>,
    {
        self.running.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);

        info!(
            "Connecting to broker {}:{} as '{}' ({} topics)",
            self.config.host,
            self.config.port,
            self.config.client_id,
            self.config.topics.len()
        );

        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(self.config.keep_alive());

        let (client, mut eventloop) = AsyncClient::new(options, 64);

        let result = self.event_loop(&client, &mut eventloop, handler).await;

        self.set_state(ConnectionState::Disconnected);
        if let Err(e) = client.disconnect().await {
            debug!("Disconnect on shutdown failed: {}", e);
        }

        result.map(|()| SourceStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        })
    }

    /// Poll the event loop until shutdown, a graceful handler stop, or a
    /// fatal handler error.
    async fn event_loop<F>(
        &self,
        client: &AsyncClient,
        eventloop: &mut rumqttc::EventLoop,
        mut handler: F,
    ) -> Result<()>
    where
        F: FnMut(&str, &[u8]) -> Result<bool>,
    {
        while self.running.load(Ordering::SeqCst) {
            let event = match tokio::time::timeout(POLL_TIMEOUT, eventloop.poll()).await {
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    // Transport fault: the event loop retries on the next
                    // poll; subscriptions are reissued on the next CONNACK.
                    warn!("Broker connection lost: {}", e);
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("ingest_reconnects_total").increment(1);
                    self.set_state(ConnectionState::Reconnecting);
                    tokio::time::sleep(RECONNECT_PAUSE).await;
                    continue;
                }
                // Timeout: check the shutdown flag and keep polling.
                Err(_) => continue,
            };

            match event {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    self.handle_connack(client, &ack).await;
                }
                Event::Incoming(Packet::SubAck(_)) => {
                    self.set_state(ConnectionState::Receiving);
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    self.messages_received.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("ingest_messages_total").increment(1);

                    match handler(&publish.topic, &publish.payload) {
                        Ok(true) => {}
                        Ok(false) => {
                            info!("Handler requested stop");
                            break;
                        }
                        Err(e) => {
                            error!("Fatal ingestion fault, stopping worker: {}", e);
                            return Err(e);
                        }
                    }
                }
                Event::Incoming(_) | Event::Outgoing(_) => {}
            }
        }

        Ok(())
    }

    /// React to a CONNACK: log the broker's verdict and, on success,
    /// (re-)issue every subscription. Subscribing here means a lost
    /// connection renews its subscriptions as soon as it is back.
    async fn handle_connack(&self, client: &AsyncClient, ack: &ConnAck) {
        if ack.code != ConnectReturnCode::Success {
            error!("Broker refused connection: {}", describe_return_code(ack.code));
            return;
        }

        info!("Connected to broker");
        self.set_state(ConnectionState::Subscribed);

        for topic in &self.config.topics {
            match client.subscribe(topic.clone(), QoS::AtMostOnce).await {
                Ok(()) => info!("Subscription to {} requested", topic),
                Err(e) => {
                    // Not fatal: the next reconnect cycle retries.
                    error!("Subscription to {} failed: {}", topic, e);
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Connection state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }
}

/// Human-readable CONNACK return codes.
fn describe_return_code(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "connection successful",
        ConnectReturnCode::RefusedProtocolVersion => "refused - incorrect protocol version",
        ConnectReturnCode::BadClientId => "refused - invalid client identifier",
        ConnectReturnCode::ServiceUnavailable => "refused - server unavailable",
        ConnectReturnCode::BadUserNamePassword => "refused - bad user name or password",
        ConnectReturnCode::NotAuthorized => "refused - not authorised",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MqttConfig {
        MqttConfig {
            host: "localhost".to_string(),
            port: 1883,
            topics: vec!["sensors/temperature".to_string()],
            client_id: "test-sub".to_string(),
            keep_alive_secs: 30,
        }
    }

    #[test]
    fn test_initial_state_is_disconnected() {
        let source = MqttSource::new(test_config());
        assert_eq!(source.connection_state(), ConnectionState::Disconnected);
        assert!(!source.is_running());
    }

    #[test]
    fn test_stop_clears_running() {
        let source = MqttSource::new(test_config());
        source.running.store(true, Ordering::SeqCst);
        source.stop();
        assert!(!source.is_running());
    }

    #[test]
    fn test_state_transitions_are_observable() {
        let source = MqttSource::new(test_config());
        source.set_state(ConnectionState::Connecting);
        assert_eq!(source.connection_state(), ConnectionState::Connecting);
        source.set_state(ConnectionState::Reconnecting);
        assert_eq!(source.connection_state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_describe_return_code() {
        assert_eq!(
            describe_return_code(ConnectReturnCode::Success),
            "connection successful"
        );
        assert!(describe_return_code(ConnectReturnCode::NotAuthorized).contains("not authorised"));
    }
}

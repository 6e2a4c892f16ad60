//! YAML configuration for the bridge daemon.
//!
//! Mirrors the layout of the deployment config file:
//!
//! ```yaml
//! mqtt:
//!   host: "broker.example.com"
//!   port: 1883
//!   topics:
//!     - sensors/+/temperature
//! influx:
//!   host: "influx.example.com"
//!   port: 8086
//!   token: "..."
//!   organization: "myorg"
//!   bucket: "telemetry"
//! queue:
//!   data_dir: "/var/lib/mqflux"
//! verbosity: false
//! ```

use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fixed name of the queue store directory under `queue.data_dir`.
pub const STORE_NAME: &str = "records";

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// MQTT broker connection settings.
    pub mqtt: MqttConfig,

    /// InfluxDB connection settings.
    pub influx: InfluxConfig,

    /// Durable queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Enable debug-level logging for the bridge crates.
    #[serde(default)]
    pub verbosity: bool,
}

/// MQTT broker connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname or IP.
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Topic filters to subscribe to. Reissued on every reconnect.
    pub topics: Vec<String>,

    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl MqttConfig {
    /// Keep-alive interval as a [`Duration`].
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// InfluxDB v2 connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    /// InfluxDB hostname or IP.
    pub host: String,

    /// InfluxDB port.
    #[serde(default = "default_influx_port")]
    pub port: u16,

    /// Authentication token.
    pub token: String,

    /// InfluxDB organization.
    pub organization: String,

    /// InfluxDB bucket.
    pub bucket: String,
}

impl InfluxConfig {
    /// Base URL of the InfluxDB server.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Durable queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Directory holding the queue store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl QueueConfig {
    /// Full path of the queue store directory.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_NAME)
    }
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_influx_port() -> u16 {
    8086
}

fn default_client_id() -> String {
    "mqflux-bridge-sub".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl BridgeConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: BridgeConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Parse configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
mqtt:
  host: "localhost"
  topics:
    - sensors/temperature
influx:
  host: "localhost"
  token: "test-token"
  organization: "myorg"
  bucket: "mybucket"
"#;

    const FULL_YAML: &str = r#"
mqtt:
  host: "broker.example.com"
  port: 8883
  topics:
    - sensors/+/temperature
    - sensors/+/humidity
  client_id: "edge-gateway-sub"
  keep_alive_secs: 60
influx:
  host: "influx.example.com"
  port: 9999
  token: "test-token-placeholder"
  organization: "prod-org"
  bucket: "telemetry"
queue:
  data_dir: "/var/lib/mqflux"
verbosity: true
"#;

    #[test]
    fn test_config_parse_minimal() {
        let config = BridgeConfig::from_yaml(MINIMAL_YAML).expect("parse minimal yaml");

        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topics, vec!["sensors/temperature"]);
        assert_eq!(config.mqtt.client_id, "mqflux-bridge-sub");
        assert_eq!(config.mqtt.keep_alive(), Duration::from_secs(30));

        assert_eq!(config.influx.port, 8086);
        assert_eq!(config.influx.url(), "http://localhost:8086");
        assert_eq!(config.influx.organization, "myorg");
        assert_eq!(config.influx.bucket, "mybucket");

        assert_eq!(config.queue.data_dir, PathBuf::from("./data"));
        assert!(!config.verbosity);
    }

    #[test]
    fn test_config_parse_all_fields() {
        let config = BridgeConfig::from_yaml(FULL_YAML).expect("parse full yaml");

        assert_eq!(config.mqtt.host, "broker.example.com");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.topics.len(), 2);
        assert_eq!(config.mqtt.client_id, "edge-gateway-sub");
        assert_eq!(config.mqtt.keep_alive_secs, 60);

        assert_eq!(config.influx.url(), "http://influx.example.com:9999");
        assert_eq!(config.influx.token, "test-token-placeholder");

        assert_eq!(
            config.queue.store_path(),
            PathBuf::from("/var/lib/mqflux/records")
        );
        assert!(config.verbosity);
    }

    #[test]
    fn test_config_rejects_missing_sections() {
        let err = BridgeConfig::from_yaml("mqtt:\n  host: x\n  topics: []\n").unwrap_err();
        assert!(err.to_string().contains("influx"));
    }

    #[test]
    fn test_store_path_uses_fixed_name() {
        let queue = QueueConfig {
            data_dir: PathBuf::from("/tmp/bridge"),
        };
        assert_eq!(queue.store_path(), PathBuf::from("/tmp/bridge/records"));
    }
}

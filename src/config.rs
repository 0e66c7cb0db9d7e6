//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `hub.toml`.
//!     loads configuration from file or falls back to defaults.
//!     loaded once at startup; nothing mutates it afterwards.
//!
//! structure:
//!     - ServerConfig:   listen address of the hub api.
//!     - StorageConfig:  where the sqlite reading log lives.
//!     - ProducersConfig: the fixed set of producer ids the hub accepts.
//!     - ClusterConfig:  which role this process plays (hub or node).
//!     - NodeConfig:     identity, hub url, loop timing and retry policy of a node.
//!     - SensorConfig:   which sensor source a node reads.
//!
//! ==============================================================================

use crate::agent::change;
use crate::domain::ProducerSet;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub producers: ProducersConfig,
    pub logging: LoggingConfig,
    pub cluster: ClusterConfig,
    pub node: NodeConfig,
    pub sensor: SensorConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProducersConfig {
    pub valid: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// print every field when a node's readings change
    pub show_sensor_data: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Hub,
    Node,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ClusterConfig {
    pub role: Role,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NodeConfig {
    pub producer_id: String,
    /// base url of the hub (e.g., "http://10.15.22.38:9000")
    pub hub_url: String,
    pub device_type: String,
    pub interval_seconds: u64,
    /// delay after a failed iteration
    pub error_delay_seconds: u64,
    pub connect_attempts: u32,
    pub connect_timeout_seconds: u64,
    pub send_timeout_seconds: u64,
    pub change_threshold: f64,
    /// wait before re-executing the process after a fatal error
    pub restart_delay_seconds: u64,
    /// optional command that joins the network, e.g.
    /// ["nmcli", "dev", "wifi", "connect", "Hotspot-SMK", "password", "..."]
    pub attach_command: Vec<String>,
    /// optional command that exits 0 while the network is attached, e.g.
    /// ["nm-online", "-x", "-q", "--timeout", "0"]. without one the node
    /// asks the kernel for a route to the hub.
    pub link_check_command: Vec<String>,
    pub status_led_pin: Option<u8>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    #[default]
    System,
    Command,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: SensorKind,
    /// program + args; must print one json object on stdout
    pub command: Vec<String>,
    pub timeout_seconds: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 9000 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("sensor_data.db") }
    }
}

impl Default for ProducersConfig {
    fn default() -> Self {
        Self { valid: (1..=6).map(|n| format!("group_{}", n)).collect() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            producer_id: String::new(),
            hub_url: String::new(),
            device_type: "esp32".to_string(),
            interval_seconds: 5,
            error_delay_seconds: 10,
            connect_attempts: 3,
            connect_timeout_seconds: 20,
            send_timeout_seconds: 10,
            change_threshold: change::DEFAULT_THRESHOLD,
            restart_delay_seconds: 10,
            attach_command: Vec::new(),
            link_check_command: Vec::new(),
            status_led_pin: None,
        }
    }
}

impl NodeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_secs(self.error_delay_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_seconds)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_seconds)
    }
}

/// where the running config came from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    /// no usable file; the paths that were tried and why they failed
    Defaults { rejected: Vec<(PathBuf, String)> },
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// Load with default fallback
    ///
    /// runs before logging is up, so it reports what happened instead of
    /// printing it.
    pub fn load_or_default() -> (Self, ConfigSource) {
        let paths = [
            PathBuf::from("config").join("hub.toml"),
            PathBuf::from("..").join("config").join("hub.toml"),
        ];

        let mut rejected = Vec::new();
        for path in paths {
            if path.exists() {
                match Self::load(&path) {
                    Ok(config) => return (config, ConfigSource::File(path)),
                    Err(e) => rejected.push((path, format!("{:#}", e))),
                }
            }
        }

        (Self::default(), ConfigSource::Defaults { rejected })
    }

    pub fn producer_set(&self) -> ProducerSet {
        self.producers.valid.iter().cloned().collect()
    }

    /// reject configurations the selected role can't run with
    pub fn validate(&self) -> Result<()> {
        match self.cluster.role {
            Role::Hub => {
                if self.producer_set().is_empty() {
                    bail!("producers.valid must list at least one producer id");
                }
            }
            Role::Node => {
                if self.node.producer_id.is_empty() {
                    bail!("node.producer_id is required when running as a node");
                }
                if self.node.hub_url.is_empty() {
                    bail!("node.hub_url is required when running as a node");
                }
                if self.node.connect_attempts == 0 {
                    bail!("node.connect_attempts must be at least 1");
                }
                if self.sensor.kind == SensorKind::Command && self.sensor.command.is_empty() {
                    bail!("sensor.command is required for the command sensor");
                }
            }
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!("[CONFIG] Role: {:?}", self.cluster.role);
        match self.cluster.role {
            Role::Hub => {
                tracing::info!("[CONFIG] Listen: {}:{}", self.server.host, self.server.port);
                tracing::info!("[CONFIG] Database: {}", self.storage.path.display());
                tracing::info!("[CONFIG] Producers: {}", self.producers.valid.join(", "));
            }
            Role::Node => {
                tracing::info!("[CONFIG] Producer ID: {}", self.node.producer_id);
                tracing::info!("[CONFIG] Hub: {}", self.node.hub_url);
                tracing::info!("[CONFIG] Interval: {}s", self.node.interval_seconds);
                tracing::info!("[CONFIG] Sensor: {:?}", self.sensor.kind);
                if !self.producers.valid.is_empty()
                    && !self.producers.valid.contains(&self.node.producer_id)
                {
                    tracing::warn!(
                        "[CONFIG] {} is not in producers.valid, the hub will reject it",
                        self.node.producer_id
                    );
                }
            }
        }
        tracing::info!("[CONFIG] Log Level: {}", self.logging.level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_classroom_setup() {
        let config = HostConfig::default();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.path, PathBuf::from("sensor_data.db"));
        assert_eq!(config.producer_set().len(), 6);
        assert!(config.producer_set().contains("group_6"));
        assert_eq!(config.node.connect_attempts, 3);
        assert_eq!(config.node.interval(), Duration::from_secs(5));
        assert_eq!(config.node.error_delay(), Duration::from_secs(10));
        assert_eq!(config.node.change_threshold, change::DEFAULT_THRESHOLD);
        assert!(config.node.link_check_command.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = HostConfig::from_toml(
            r#"
            [cluster]
            role = "node"

            [node]
            producer_id = "group_2"
            hub_url = "http://10.0.0.5:9000"
            change_threshold = 1.5
            link_check_command = ["nm-online", "-x", "-q"]

            [sensor]
            kind = "command"
            command = ["python3", "read_dht22.py"]
            "#,
        )
        .unwrap();

        assert_eq!(config.cluster.role, Role::Node);
        assert_eq!(config.node.change_threshold, 1.5);
        assert_eq!(config.node.link_check_command, ["nm-online", "-x", "-q"]);
        assert_eq!(config.node.interval_seconds, 5);
        assert_eq!(config.sensor.kind, SensorKind::Command);
        assert_eq!(config.server.port, 9000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn node_without_identity_is_rejected() {
        let mut config = HostConfig::default();
        config.cluster.role = Role::Node;
        assert!(config.validate().is_err());
        config.node.producer_id = "group_1".into();
        assert!(config.validate().is_err());
        config.node.hub_url = "http://hub:9000".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn hub_needs_producers() {
        let config = HostConfig::from_toml("[producers]\nvalid = []\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(HostConfig::from_toml("[server\nport = 1").is_err());
    }
}

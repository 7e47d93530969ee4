//! Process configuration.
//!
//! Every field has a default matching the stock three-bin deployment, so an
//! empty JSON object is a valid configuration file.

use crate::publisher::{DEFAULT_TOPIC_PREFIX, PublisherConfig};
use crate::reading::BinIdentity;
use crate::simulation::LoopSettings;
use crate::transport::MqttSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub topic_prefix: String,
    pub connect_timeout_ms: u64,
    pub retry_delay_ms: u64,
    /// Refuse to start when the first broker connection fails. When false
    /// the loop runs with every publish dropped.
    pub publish_required: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("ecobin-{}", uuid::Uuid::new_v4()),
            keep_alive_secs: 60,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            connect_timeout_ms: 5000,
            retry_delay_ms: 1000,
            publish_required: true,
        }
    }
}

impl BrokerConfig {
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            request_capacity: 64,
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            topic_prefix: self.topic_prefix.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            ..PublisherConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("waste_data.db"),
            busy_timeout_ms: 2000,
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub interval_ms: u64,
    pub seed: Option<u64>,
    pub max_ticks: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            seed: None,
            max_ticks: None,
        }
    }
}

impl SimulationConfig {
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            interval: Duration::from_millis(self.interval_ms),
            max_ticks: self.max_ticks,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub limit: usize,
    pub refresh_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            refresh_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EcobinConfig {
    pub broker: BrokerConfig,
    pub store: StoreConfig,
    pub simulation: SimulationConfig,
    pub roster: Vec<BinIdentity>,
    pub viewer: ViewerConfig,
}

impl Default for EcobinConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            store: StoreConfig::default(),
            simulation: SimulationConfig::default(),
            roster: default_roster(),
            viewer: ViewerConfig::default(),
        }
    }
}

pub fn default_roster() -> Vec<BinIdentity> {
    vec![
        BinIdentity::new("EBIN001", "City Center"),
        BinIdentity::new("EBIN002", "Main Street"),
        BinIdentity::new("EBIN003", "Park Area"),
    ]
}

/// Errors that can occur while loading configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Read(String),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read(e) => write!(f, "Failed to read config: {}", e),
            Self::Parse(e) => write!(f, "Failed to parse config: {}", e),
            Self::Invalid(e) => write!(f, "Invalid config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl EcobinConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roster.is_empty() {
            return Err(ConfigError::Invalid("roster is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for bin in &self.roster {
            if bin.bin_id.trim().is_empty() {
                return Err(ConfigError::Invalid("bin_id must not be empty".to_string()));
            }
            if !seen.insert(bin.bin_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate bin_id: {}",
                    bin.bin_id
                )));
            }
        }

        if self.simulation.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "simulation.interval_ms must be positive".to_string(),
            ));
        }
        if self.viewer.limit == 0 {
            return Err(ConfigError::Invalid(
                "viewer.limit must be positive".to_string(),
            ));
        }
        if self.viewer.refresh_ms == 0 {
            return Err(ConfigError::Invalid(
                "viewer.refresh_ms must be positive".to_string(),
            ));
        }
        if self.broker.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "broker.connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.broker.topic_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid(
                "broker.topic_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_yields_defaults() {
        let config = EcobinConfig::from_json("{}").unwrap();
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.topic_prefix, "smart_city/waste");
        assert!(config.broker.client_id.starts_with("ecobin-"));
        assert_eq!(config.simulation.interval_ms, 5000);
        assert_eq!(config.store.path, PathBuf::from("waste_data.db"));
        assert_eq!(config.roster.len(), 3);
        assert_eq!(config.roster[2], BinIdentity::new("EBIN003", "Park Area"));
    }

    #[test]
    fn test_partial_sections() {
        let config = EcobinConfig::from_json(
            r#"{
                "broker": { "host": "broker.local", "publish_required": false },
                "simulation": { "interval_ms": 250, "seed": 9 },
                "roster": [ { "bin_id": "B1", "location": "Dock" } ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.broker.host, "broker.local");
        assert_eq!(config.broker.port, 1883);
        assert!(!config.broker.publish_required);
        assert_eq!(config.simulation.loop_settings().interval, Duration::from_millis(250));
        assert_eq!(config.simulation.seed, Some(9));
        assert_eq!(config.roster, vec![BinIdentity::new("B1", "Dock")]);
    }

    #[test]
    fn test_rejects_bad_rosters() {
        assert!(matches!(
            EcobinConfig::from_json(r#"{ "roster": [] }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EcobinConfig::from_json(
                r#"{ "roster": [ {"bin_id": "A", "location": "x"}, {"bin_id": "A", "location": "y"} ] }"#
            ),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EcobinConfig::from_json(r#"{ "roster": [ {"bin_id": " ", "location": "x"} ] }"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_zero_interval_and_bad_json() {
        assert!(matches!(
            EcobinConfig::from_json(r#"{ "simulation": { "interval_ms": 0 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EcobinConfig::from_json(r#"{ "viewer": { "refresh_ms": 0 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EcobinConfig::from_json(r#"{ "broker": { "connect_timeout_ms": 0 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EcobinConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}

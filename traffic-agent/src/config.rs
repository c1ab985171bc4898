//! Configuration management
//!
//! Sources, lowest precedence first:
//! - Built-in defaults
//! - Optional TOML file (`TRAFFIC_AGENT_CONFIG`, default `traffic-agent.toml`)
//! - Environment variables (a `.env` file is loaded by the binary)
//!
//! Secrets (routing key, certificates) only come from the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ConfigError;

pub const CONFIG_PATH_VAR: &str = "TRAFFIC_AGENT_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "traffic-agent.toml";

/// Non-secret settings readable from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub database_path: Option<PathBuf>,
    pub snapshot_path: Option<PathBuf>,
    pub interval_secs: Option<u64>,
    pub publish_timeout_secs: Option<u64>,
    pub routing_timeout_secs: Option<u64>,
    pub storage_failure_alert_threshold: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub endpoint: Option<String>,
    pub port: u16,
    pub cert_path: PathBuf,
    pub private_key_path: PathBuf,
    pub ca_path: PathBuf,
}

/// Everything needed to open the mutual-TLS session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub endpoint: String,
    pub port: u16,
    pub client_id: String,
    pub cert_path: PathBuf,
    pub private_key_path: PathBuf,
    pub ca_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub device_id: String,
    pub broker: BrokerConfig,
    pub routing_api_key: Option<String>,
    pub database_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub interval: Duration,
    pub publish_timeout: Duration,
    pub routing_timeout: Duration,
    pub storage_failure_alert_threshold: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: "AnkaraTrafficSystem".to_string(),
            broker: BrokerConfig {
                endpoint: None,
                port: 8883,
                cert_path: PathBuf::from("./certs/device.pem.crt"),
                private_key_path: PathBuf::from("./certs/private.pem.key"),
                ca_path: PathBuf::from("./certs/Amazon-root-CA-1.pem"),
            },
            routing_api_key: None,
            database_path: PathBuf::from("traffic_data.db"),
            snapshot_path: PathBuf::from("current_traffic_data.json"),
            interval: Duration::from_secs(20),
            publish_timeout: Duration::from_secs(10),
            routing_timeout: Duration::from_secs(10),
            storage_failure_alert_threshold: 3,
        }
    }
}

impl AgentConfig {
    /// Reads the config file (if any) and the process environment.
    pub async fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        let file = FileConfig::load(Path::new(&path)).await?;
        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    /// Merges defaults, file values and environment lookups.
    pub fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = file.database_path {
            config.database_path = path;
        }
        if let Some(path) = file.snapshot_path {
            config.snapshot_path = path;
        }
        if let Some(secs) = file.interval_secs {
            config.interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = file.publish_timeout_secs {
            config.publish_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.routing_timeout_secs {
            config.routing_timeout = Duration::from_secs(secs);
        }
        if let Some(threshold) = file.storage_failure_alert_threshold {
            config.storage_failure_alert_threshold = threshold.max(1);
        }

        config.broker.endpoint = lookup("AWS_IOT_ENDPOINT");
        if let Some(port) = lookup("AWS_IOT_PORT") {
            match port.parse() {
                Ok(port) => config.broker.port = port,
                Err(_) => warn!("Ignoring invalid AWS_IOT_PORT: {}", port),
            }
        }
        if let Some(path) = lookup("AWS_IOT_CERT_PATH") {
            config.broker.cert_path = path.into();
        }
        if let Some(path) = lookup("AWS_IOT_PRIVATE_KEY_PATH") {
            config.broker.private_key_path = path.into();
        }
        if let Some(path) = lookup("AWS_IOT_CA_PATH") {
            config.broker.ca_path = path.into();
        }
        if let Some(name) = lookup("AWS_IOT_THING_NAME") {
            config.device_id = name;
        }
        config.routing_api_key = lookup("GOOGLE_MAPS_API_KEY");

        config
    }

    /// Fails with the first missing item; callers switch to offline mode.
    pub fn broker_settings(&self) -> Result<BrokerSettings, ConfigError> {
        let endpoint = self
            .broker
            .endpoint
            .clone()
            .ok_or_else(|| ConfigError::Missing("AWS_IOT_ENDPOINT".into()))?;

        for path in [&self.broker.cert_path, &self.broker.private_key_path, &self.broker.ca_path] {
            if !path.exists() {
                return Err(ConfigError::CertificateNotFound(path.clone()));
            }
        }

        Ok(BrokerSettings {
            endpoint,
            port: self.broker.port,
            client_id: self.device_id.clone(),
            cert_path: self.broker.cert_path.clone(),
            private_key_path: self.broker.private_key_path.clone(),
            ca_path: self.broker.ca_path.clone(),
        })
    }
}

impl FileConfig {
    /// Missing file means defaults; an unparsable file is an error.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = tokio::fs::read_to_string(path).await?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&text).map_err(|source| ConfigError::InvalidFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AgentConfig::from_sources(FileConfig::default(), env_of(&[]));
        assert_eq!(config.device_id, "AnkaraTrafficSystem");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.interval, Duration::from_secs(20));
        assert_eq!(config.database_path, PathBuf::from("traffic_data.db"));
        assert!(config.routing_api_key.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let file = FileConfig {
            interval_secs: Some(5),
            snapshot_path: Some("out/snap.json".into()),
            ..FileConfig::default()
        };
        let config = AgentConfig::from_sources(
            file,
            env_of(&[
                ("AWS_IOT_ENDPOINT", "abc-ats.iot.eu-central-1.amazonaws.com"),
                ("AWS_IOT_THING_NAME", "Junction42"),
                ("AWS_IOT_PORT", "443"),
                ("GOOGLE_MAPS_API_KEY", "  "),
            ]),
        );
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.snapshot_path, PathBuf::from("out/snap.json"));
        assert_eq!(config.device_id, "Junction42");
        assert_eq!(config.broker.port, 443);
        assert!(config.routing_api_key.is_none());
    }

    #[test]
    fn test_broker_settings_require_endpoint_and_certs() {
        let config = AgentConfig::from_sources(FileConfig::default(), env_of(&[]));
        assert!(matches!(config.broker_settings(), Err(ConfigError::Missing(_))));

        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("device.pem.crt");
        let key = dir.path().join("private.pem.key");
        let ca = dir.path().join("ca.pem");
        std::fs::write(&cert, "cert").unwrap();
        std::fs::write(&key, "key").unwrap();

        let pairs = [
            ("AWS_IOT_ENDPOINT", "broker.example"),
            ("AWS_IOT_CERT_PATH", cert.to_str().unwrap()),
            ("AWS_IOT_PRIVATE_KEY_PATH", key.to_str().unwrap()),
            ("AWS_IOT_CA_PATH", ca.to_str().unwrap()),
        ];
        let config = AgentConfig::from_sources(FileConfig::default(), env_of(&pairs));
        assert!(matches!(config.broker_settings(), Err(ConfigError::CertificateNotFound(p)) if p == ca));

        std::fs::write(&ca, "ca").unwrap();
        let settings = config.broker_settings().unwrap();
        assert_eq!(settings.endpoint, "broker.example");
        assert_eq!(settings.client_id, "AnkaraTrafficSystem");
    }

    #[tokio::test]
    async fn test_file_config_parsing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileConfig::load(&dir.path().join("absent.toml")).await.unwrap().interval_secs.is_none());

        let path = dir.path().join("agent.toml");
        tokio::fs::write(&path, "interval_secs = 60\ndatabase_path = \"/var/lib/traffic.db\"\n")
            .await
            .unwrap();
        let file = FileConfig::load(&path).await.unwrap();
        assert_eq!(file.interval_secs, Some(60));
        assert_eq!(file.database_path, Some(PathBuf::from("/var/lib/traffic.db")));

        tokio::fs::write(&path, "interval_secs = \"soon\"").await.unwrap();
        assert!(matches!(FileConfig::load(&path).await, Err(ConfigError::InvalidFile { .. })));
    }
}

//! Error taxonomy for the agent
//!
//! Every variant maps to a degradation policy, none of them stops the process:
//! - ConfigurationMissing: run offline (no broker)
//! - Connect / Publish: log, keep persisting and exporting
//! - Routing: fall back to the heuristic estimate
//! - Storage: propagate to the cycle, which logs and counts it

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration missing: {0}")]
    Missing(String),
    #[error("certificate file not found: {0}")]
    CertificateNotFound(PathBuf),
    #[error("invalid config file {path}: {source}")]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("broker connection failed: {0}")]
    Connect(String),
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("routing request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("routing API returned status {0}")]
    Status(u16),
    #[error("malformed routing response: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid stored value: {0}")]
    InvalidData(String),
    #[error("database worker unavailable")]
    WorkerGone,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

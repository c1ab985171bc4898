//! Ankara traffic agent
//!
//! Estimates congestion for a fixed set of Ankara intersections on a timer,
//! stores every reading in SQLite, forwards batches and congestion alerts to
//! AWS IoT Core over MQTT and keeps a JSON snapshot of the latest batch for
//! local readers. Commands arriving on the device topic can trigger an extra
//! cycle.

pub mod commands;
pub mod config;
pub mod error;
pub mod estimator;
pub mod export;
pub mod gateway;
pub mod intersections;
pub mod messages;
pub mod models;
pub mod pipeline;
pub mod routing;
pub mod storage;

pub use config::AgentConfig;
pub use error::{ConfigError, ExportError, GatewayError, RoutingError, StorageError};
pub use gateway::{Gateway, Publisher};
pub use models::{BrokerMessage, Direction, Reading, TrafficStatus};
pub use pipeline::{CycleReport, Pipeline, RunRequest};
pub use storage::Database;

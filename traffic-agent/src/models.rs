use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Congestion class derived from the density percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficStatus {
    Normal,
    Moderate,
    Critical,
}

impl TrafficStatus {
    /// `density` is the 0-100 percentage: >70 critical, >40 moderate.
    pub fn from_density(density: f64) -> Self {
        if density > 70.0 {
            TrafficStatus::Critical
        } else if density > 40.0 {
            TrafficStatus::Moderate
        } else {
            TrafficStatus::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficStatus::Normal => "normal",
            TrafficStatus::Moderate => "moderate",
            TrafficStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for TrafficStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrafficStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(TrafficStatus::Normal),
            "moderate" => Ok(TrafficStatus::Moderate),
            "critical" => Ok(TrafficStatus::Critical),
            other => Err(format!("unknown traffic status '{other}'")),
        }
    }
}

/// One cycle's metrics for one intersection. Never mutated after persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub intersection_id: u32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Percentage with one decimal place.
    pub density: f64,
    pub avg_speed: u32,
    pub wait_time: u32,
    pub vehicle_count: u32,
    pub status: TrafficStatus,
    pub timestamp: DateTime<Utc>,
    /// Set by the storage layer when the batch is written.
    pub correlation_id: Option<Uuid>,
}

impl Reading {
    pub fn is_critical(&self) -> bool {
        self.status == TrafficStatus::Critical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Received,
    Published,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Received => "received",
            Direction::Published => "published",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Direction::Received),
            "published" => Ok(Direction::Published),
            other => Err(format!("unknown message direction '{other}'")),
        }
    }
}

/// Audit row for every inbound message and every successful publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
}

impl BrokerMessage {
    pub fn received(topic: &str, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.to_string(),
            payload,
            timestamp: Utc::now(),
            direction: Direction::Received,
        }
    }

    /// Wraps the sent document as `{"status": "published", "message": ...}`.
    pub fn published(topic: &str, message: serde_json::Value) -> Self {
        Self {
            topic: topic.to_string(),
            payload: serde_json::json!({ "status": "published", "message": message }),
            timestamp: Utc::now(),
            direction: Direction::Published,
        }
    }
}

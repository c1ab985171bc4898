//! Broker documents
//!
//! Outbound: traffic data batch and congestion alert.
//! Inbound: command envelope on the device's command topic.
//! Field names follow the camelCase layout consumers already parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Reading, TrafficStatus};

pub const LOCATION: &str = "Ankara, Turkey";
pub const UPDATE_ANALYSIS: &str = "update_analysis";

/// Device-scoped topic names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub data: String,
    pub alerts: String,
    pub commands: String,
}

impl Topics {
    pub fn for_device(device_id: &str) -> Self {
        Self {
            data: format!("ankara-traffic/data/{device_id}"),
            alerts: format!("ankara-traffic/alerts/{device_id}"),
            commands: format!("ankara-traffic/commands/{device_id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficDataMessage {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub system_status: String,
    pub data_type: String,
    pub intersections: Vec<IntersectionReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionReport {
    pub intersection_id: u32,
    pub correlation_id: Option<Uuid>,
    pub name: String,
    pub coordinates: Coordinates,
    pub metrics: Metrics,
    pub status: TrafficStatus,
    pub timestamp: DateTime<Utc>,
    pub alerts: Vec<IntersectionAlert>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub density: f64,
    pub average_speed: u32,
    pub wait_time: u32,
    pub vehicle_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntersectionAlert {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub severity: String,
}

impl TrafficDataMessage {
    pub fn from_readings(device_id: &str, readings: &[Reading], now: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.to_string(),
            timestamp: now,
            location: LOCATION.to_string(),
            system_status: "active".to_string(),
            data_type: "traffic_analysis".to_string(),
            intersections: readings.iter().map(IntersectionReport::from).collect(),
        }
    }
}

impl From<&Reading> for IntersectionReport {
    fn from(reading: &Reading) -> Self {
        let alerts = if reading.is_critical() {
            vec![IntersectionAlert {
                kind: "HEAVY_TRAFFIC".to_string(),
                message: format!("Heavy traffic: {}", reading.name),
                severity: "HIGH".to_string(),
            }]
        } else {
            Vec::new()
        };

        Self {
            intersection_id: reading.intersection_id,
            correlation_id: reading.correlation_id,
            name: reading.name.clone(),
            coordinates: Coordinates {
                latitude: reading.latitude,
                longitude: reading.longitude,
            },
            metrics: Metrics {
                density: reading.density,
                average_speed: reading.avg_speed,
                wait_time: reading.wait_time,
                vehicle_count: reading.vehicle_count,
            },
            status: reading.status,
            timestamp: reading.timestamp,
            alerts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMessage {
    pub alert_type: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
    pub affected_intersections: Vec<AffectedIntersection>,
    pub recommended_action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedIntersection {
    pub id: u32,
    pub name: String,
    pub density: f64,
}

impl AlertMessage {
    /// `None` when the batch has no critical reading.
    pub fn for_critical(readings: &[Reading], now: DateTime<Utc>) -> Option<Self> {
        let affected: Vec<AffectedIntersection> = readings
            .iter()
            .filter(|r| r.is_critical())
            .map(|r| AffectedIntersection {
                id: r.intersection_id,
                name: r.name.clone(),
                density: r.density,
            })
            .collect();

        if affected.is_empty() {
            return None;
        }

        Some(Self {
            alert_type: "TRAFFIC_CONGESTION".to_string(),
            severity: "HIGH".to_string(),
            timestamp: now,
            affected_intersections: affected,
            recommended_action: "Consider alternative routes".to_string(),
        })
    }
}

/// Commands accepted on the command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    UpdateAnalysis,
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct CommandEnvelope {
    command: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("payload has no string 'command' field")]
    MissingCommand,
}

impl Command {
    pub fn parse(document: &serde_json::Value) -> Result<Self, CommandError> {
        let envelope: CommandEnvelope = serde_json::from_value(document.clone())
            .map_err(|_| CommandError::MissingCommand)?;

        Ok(match envelope.command.as_str() {
            UPDATE_ANALYSIS => Command::UpdateAnalysis,
            other => Command::Unknown(other.to_string()),
        })
    }
}

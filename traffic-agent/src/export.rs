//! JSON snapshot hand-off
//!
//! The snapshot file always holds exactly the latest batch. It is written to
//! a hidden sibling file first and renamed over the target, so readers never
//! see a half-written document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ExportError;
use crate::models::{Reading, TrafficStatus};

pub const SNAPSHOT_SOURCE: &str = "AWS_IoT_Core";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub intersections: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub id: u32,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub density: f64,
    pub avg_speed: u32,
    pub wait_time: u32,
    pub vehicle_count: u32,
    pub status: TrafficStatus,
}

impl From<&Reading> for SnapshotEntry {
    fn from(r: &Reading) -> Self {
        Self {
            id: r.intersection_id,
            name: r.name.clone(),
            lat: r.latitude,
            lng: r.longitude,
            density: r.density,
            avg_speed: r.avg_speed,
            wait_time: r.wait_time,
            vehicle_count: r.vehicle_count,
            status: r.status,
        }
    }
}

impl Snapshot {
    pub fn from_readings(readings: &[Reading], now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            source: SNAPSHOT_SOURCE.to_string(),
            intersections: readings.iter().map(SnapshotEntry::from).collect(),
        }
    }

    /// `Ok(None)` when no snapshot has been written yet.
    pub async fn load(path: &Path) -> Result<Option<Self>, ExportError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot.json".to_string());
        self.path.with_file_name(format!(".{file_name}.tmp"))
    }

    /// Replaces the snapshot with `readings`.
    pub async fn write(&self, readings: &[Reading], now: DateTime<Utc>) -> Result<(), ExportError> {
        let snapshot = Snapshot::from_readings(readings, now);
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Snapshot updated: {} intersections", snapshot.intersections.len());
        Ok(())
    }
}

/*!
Test fixtures

- `TestWorkspace`: temporary directory for the database and snapshot files
- `TestHarness`: publish expectations and JSON field assertions over a
  `MockMqttClient`
- Fixed Ankara (UTC+3) timestamps for time-of-day dependent code
*/

use crate::mqtt_stub::MockMqttClient;
use anyhow::Result;
use chrono::{DateTime, FixedOffset, TimeZone};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary directory removed on drop.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        env_logger::try_init().ok();
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("traffic_data.db")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.path().join("current_traffic_data.json")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

pub fn ankara_offset() -> FixedOffset {
    FixedOffset::east_opt(3 * 3600).expect("valid offset")
}

/// Monday 2025-10-13 at `hour:minute` Ankara time.
pub fn weekday_at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
    ankara_offset()
        .with_ymd_and_hms(2025, 10, 13, hour, minute, 0)
        .single()
        .expect("valid local time")
}

/// Saturday 2025-10-18 at `hour:minute` Ankara time.
pub fn weekend_at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
    ankara_offset()
        .with_ymd_and_hms(2025, 10, 18, hour, minute, 0)
        .single()
        .expect("valid local time")
}

/// Publish expectations and assertions over a mock client.
pub struct TestHarness {
    pub mqtt_client: MockMqttClient,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    topic: String,
    expected_count: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok();
        Self::with_client(MockMqttClient::new())
    }

    pub fn with_client(mqtt_client: MockMqttClient) -> Self {
        Self {
            mqtt_client,
            expectations: Vec::new(),
        }
    }

    /// Expect exactly `count` messages on `topic`.
    pub fn expect_messages(&mut self, topic: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            topic: topic.to_string(),
            expected_count: count,
        });
        self
    }

    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual_count = self.mqtt_client.find_messages_by_topic(&expectation.topic).len();
            if actual_count != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for topic '{}': expected {} messages, got {}",
                    expectation.topic,
                    expectation.expected_count,
                    actual_count
                );
            }
            log::info!("Topic '{}': {} messages as expected", expectation.topic, actual_count);
        }
        Ok(())
    }

    /// Asserts a dotted path (`metrics.density`, `intersections.0.status`)
    /// in the latest message on `topic`.
    pub fn assert_field_equals(&self, topic: &str, field_path: &str, expected: &Value) -> Result<()> {
        let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? else {
            anyhow::bail!("No message on {}", topic);
        };
        match get_nested_field(&msg, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!(
                "Field '{}' mismatch: expected {:?}, got {:?}",
                field_path,
                expected,
                actual
            ),
            None => anyhow::bail!("Field '{}' not found in latest message on {}", field_path, topic),
        }
    }

    pub fn last_json(&self, topic: &str) -> Result<Value> {
        self.mqtt_client
            .get_last_json_message::<Value>(topic)?
            .ok_or_else(|| anyhow::anyhow!("No message on {}", topic))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Object(obj) => obj.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Weekday};
    use rumqttc::QoS;

    #[tokio::test]
    async fn test_harness_expectations() {
        let mut harness = TestHarness::new();
        harness.expect_messages("test/topic", 1).expect_messages("other/topic", 0);

        let doc = serde_json::json!({"intersections": [{"status": "critical"}]});
        harness
            .mqtt_client
            .publish("test/topic", QoS::AtLeastOnce, false, serde_json::to_vec(&doc).unwrap())
            .await
            .unwrap();

        harness.verify_expectations().unwrap();
        harness
            .assert_field_equals("test/topic", "intersections.0.status", &Value::from("critical"))
            .unwrap();
        assert!(harness.assert_field_equals("test/topic", "intersections.1", &Value::Null).is_err());

        harness.expect_messages("test/topic", 2);
        assert!(harness.verify_expectations().is_err());
    }

    #[test]
    fn test_workspace_paths() {
        let ws = TestWorkspace::new();
        assert!(ws.path().exists());
        assert!(ws.db_path().starts_with(ws.path()));
        assert_ne!(ws.db_path(), ws.snapshot_path());
    }

    #[test]
    fn test_fixed_clock() {
        let monday = weekday_at(8, 15);
        assert_eq!(monday.weekday(), Weekday::Mon);
        assert_eq!(monday.hour(), 8);
        assert_eq!(monday.offset().local_minus_utc(), 3 * 3600);
        assert_eq!(weekend_at(12, 0).weekday(), Weekday::Sat);
    }
}

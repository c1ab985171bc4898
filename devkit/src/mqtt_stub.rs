/*!
Mock MQTT client for tests without a broker

Records every publish, lets tests flip the connection state, and fails
publishes on chosen topics to exercise degraded paths.
*/

use anyhow::Result;
use rumqttc::QoS;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Stand-in for `rumqttc::AsyncClient`.
#[derive(Clone)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    connected: Arc<Mutex<bool>>,
    failing_topics: Arc<Mutex<HashSet<String>>>,
}

impl MockMqttClient {
    /// Starts connected.
    pub fn new() -> Self {
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
            failing_topics: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn disconnected() -> Self {
        let client = Self::new();
        client.set_connected(false);
        client
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.lock().unwrap() = connected;
    }

    pub fn connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    /// Publishes on `topic` fail until `heal_topic` is called.
    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().insert(topic.to_string());
    }

    pub fn heal_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().remove(topic);
    }

    /// Same shape as `AsyncClient::publish`. Failed publishes are not recorded.
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };

        if !self.connected() {
            anyhow::bail!("not connected");
        }
        if self.failing_topics.lock().unwrap().contains(&message.topic) {
            log::warn!("[MOCK] Publish to {} rejected", message.topic);
            anyhow::bail!("injected failure on {}", message.topic);
        }

        self.published_messages.lock().unwrap().push(message.clone());
        log::info!("[MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
        Ok(())
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Last message on `topic`, parsed as JSON.
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }
}

impl Default for MockMqttClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Payloads for the device command topic.
pub struct TrafficMessageBuilder;

impl TrafficMessageBuilder {
    pub fn command_json(name: &str) -> Value {
        serde_json::json!({
            "command": name,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })
    }

    pub fn command(name: &str) -> Vec<u8> {
        Self::command_json(name).to_string().into_bytes()
    }

    pub fn update_analysis() -> Vec<u8> {
        Self::command("update_analysis")
    }

    pub fn commands_topic(device_id: &str) -> String {
        format!("ankara-traffic/commands/{device_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_client_records_publishes() {
        let client = MockMqttClient::new();

        let payload = b"test message";
        client
            .publish("test/topic", QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .unwrap();

        let messages = client.get_published_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "test/topic");
        assert_eq!(messages[0].payload, payload);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let client = MockMqttClient::new();
        client.fail_topic("a/alerts");

        assert!(client.publish("a/alerts", QoS::AtLeastOnce, false, b"{}".to_vec()).await.is_err());
        assert!(client.publish("a/data", QoS::AtLeastOnce, false, b"{}".to_vec()).await.is_ok());
        assert_eq!(client.get_published_messages().len(), 1);

        client.heal_topic("a/alerts");
        client.set_connected(false);
        assert!(client.publish("a/alerts", QoS::AtLeastOnce, false, b"{}".to_vec()).await.is_err());
        assert!(!client.connected());
    }

    #[test]
    fn test_update_analysis_payload() {
        assert_eq!(
            TrafficMessageBuilder::commands_topic("dev"),
            "ankara-traffic/commands/dev"
        );
        let doc: Value = serde_json::from_slice(&TrafficMessageBuilder::update_analysis()).unwrap();
        assert_eq!(doc["command"], "update_analysis");
        assert!(doc["timestamp"].is_string());
    }
}

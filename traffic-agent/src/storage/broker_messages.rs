use rusqlite::params;

use super::{parse_db_time, to_db_time, Database};
use crate::error::StorageError;
use crate::models::BrokerMessage;

impl Database {
    pub async fn append_broker_message(&self, message: &BrokerMessage) -> Result<(), StorageError> {
        let topic = message.topic.clone();
        let payload = serde_json::to_string(&message.payload)?;
        let timestamp = to_db_time(&message.timestamp);
        let direction = message.direction.as_str();

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO broker_messages (topic, payload, timestamp, direction)
                 VALUES (?1, ?2, ?3, ?4)",
                params![topic, payload, timestamp, direction],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Latest audit rows, newest first.
    pub async fn recent_broker_messages(&self, limit: usize) -> Result<Vec<BrokerMessage>, StorageError> {
        let limit = limit as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT topic, payload, timestamp, direction
                 FROM broker_messages
                 ORDER BY id DESC
                 LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![limit])?;

            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                let payload: String = row.get(1)?;
                let timestamp: String = row.get(2)?;
                let direction: String = row.get(3)?;
                messages.push(BrokerMessage {
                    topic: row.get(0)?,
                    payload: serde_json::from_str(&payload)?,
                    timestamp: parse_db_time(&timestamp)?,
                    direction: direction.parse().map_err(StorageError::InvalidData)?,
                });
            }
            Ok(messages)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use serde_json::json;
    use traffic_devkit::TestWorkspace;

    #[tokio::test]
    async fn test_audit_trail_is_append_only() {
        let ws = TestWorkspace::new();
        let db = Database::open(ws.db_path()).unwrap();

        db.append_broker_message(&BrokerMessage::received(
            "ankara-traffic/commands/dev",
            json!({"command": "update_analysis"}),
        ))
        .await
        .unwrap();
        db.append_broker_message(&BrokerMessage::published(
            "ankara-traffic/data/dev",
            json!({"deviceId": "dev"}),
        ))
        .await
        .unwrap();

        let messages = db.recent_broker_messages(10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].direction, Direction::Published);
        assert_eq!(messages[0].payload["message"]["deviceId"], "dev");
        assert_eq!(messages[1].direction, Direction::Received);
        assert_eq!(messages[1].payload["command"], "update_analysis");

        assert_eq!(db.recent_broker_messages(1).await.unwrap().len(), 1);
    }
}

use chrono::{Duration, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{parse_db_time, to_db_time, Database};
use crate::error::StorageError;
use crate::models::Reading;

const SELECT_COLUMNS: &str = "SELECT intersection_id, name, lat, lng, density, avg_speed,
        wait_time, vehicle_count, status, timestamp, correlation_id
    FROM traffic_logs";

fn reading_from_row(row: &Row<'_>) -> Result<Reading, StorageError> {
    let status: String = row.get(8)?;
    let timestamp: String = row.get(9)?;
    let correlation_id: String = row.get(10)?;

    Ok(Reading {
        intersection_id: row.get(0)?,
        name: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        density: row.get(4)?,
        avg_speed: row.get(5)?,
        wait_time: row.get(6)?,
        vehicle_count: row.get(7)?,
        status: status.parse().map_err(StorageError::InvalidData)?,
        timestamp: parse_db_time(&timestamp)?,
        correlation_id: Some(
            Uuid::parse_str(&correlation_id)
                .map_err(|e| StorageError::InvalidData(format!("correlation id: {e}")))?,
        ),
    })
}

impl Database {
    /// Inserts the batch in one transaction. Readings without a correlation
    /// id get a fresh UUID, written back into `readings`.
    pub async fn append_readings(&self, readings: &mut [Reading]) -> Result<usize, StorageError> {
        for reading in readings.iter_mut() {
            reading.correlation_id.get_or_insert_with(Uuid::new_v4);
        }
        let batch = readings.to_vec();

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO traffic_logs (
                        intersection_id, name, lat, lng, density, avg_speed,
                        wait_time, vehicle_count, status, timestamp, correlation_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                for reading in &batch {
                    stmt.execute(params![
                        reading.intersection_id,
                        reading.name,
                        reading.latitude,
                        reading.longitude,
                        reading.density,
                        reading.avg_speed,
                        reading.wait_time,
                        reading.vehicle_count,
                        reading.status.as_str(),
                        to_db_time(&reading.timestamp),
                        reading.correlation_id.map(|id| id.to_string()),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(batch.len())
        })
        .await
    }

    /// Readings from the last `hours` hours, newest first.
    pub async fn query_recent(&self, hours: u32) -> Result<Vec<Reading>, StorageError> {
        self.query_recent_for(hours, None, None).await
    }

    /// Same as [`Database::query_recent`], optionally narrowed to one
    /// intersection and capped at `limit` rows.
    pub async fn query_recent_for(
        &self,
        hours: u32,
        intersection_id: Option<u32>,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>, StorageError> {
        let cutoff = Utc::now()
            .checked_sub_signed(Duration::hours(i64::from(hours)))
            .ok_or_else(|| StorageError::InvalidData(format!("history window of {hours}h out of range")))?;
        let cutoff = to_db_time(&cutoff);
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        self.execute(move |conn| {
            let sql = format!(
                "{SELECT_COLUMNS}
                 WHERE timestamp >= ?1 AND (?2 IS NULL OR intersection_id = ?2)
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![cutoff, intersection_id, limit])?;

            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(reading_from_row(row)?);
            }
            Ok(readings)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrafficStatus;
    use chrono::SubsecRound;
    use traffic_devkit::TestWorkspace;

    fn reading(id: u32, age: Duration) -> Reading {
        Reading {
            intersection_id: id,
            name: format!("Junction {id}"),
            latitude: 39.92,
            longitude: 32.85,
            density: 55.5,
            avg_speed: 35,
            wait_time: 100,
            vehicle_count: 110,
            status: TrafficStatus::Moderate,
            timestamp: (Utc::now() - age).trunc_subsecs(6),
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn test_append_assigns_correlation_ids() {
        let ws = TestWorkspace::new();
        let db = Database::open(ws.db_path()).unwrap();

        let preset = Uuid::new_v4();
        let mut batch = vec![reading(1, Duration::zero()), reading(2, Duration::zero())];
        batch[1].correlation_id = Some(preset);

        assert_eq!(db.append_readings(&mut batch).await.unwrap(), 2);
        assert!(batch[0].correlation_id.is_some());
        assert_eq!(batch[1].correlation_id, Some(preset));

        let stored = db.query_recent(1).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().any(|r| r.correlation_id == Some(preset)));
    }

    #[tokio::test]
    async fn test_query_recent_window() {
        let ws = TestWorkspace::new();
        let db = Database::open(ws.db_path()).unwrap();

        let mut batch = vec![reading(1, Duration::zero()), reading(2, Duration::hours(2))];
        db.append_readings(&mut batch).await.unwrap();

        let last_hour = db.query_recent(1).await.unwrap();
        assert_eq!(last_hour.len(), 1);
        assert_eq!(last_hour[0].intersection_id, 1);
        assert_eq!(last_hour[0], batch[0]);

        let last_three = db.query_recent(3).await.unwrap();
        assert_eq!(last_three.len(), 2);
    }

    #[tokio::test]
    async fn test_newest_first_and_filters() {
        let ws = TestWorkspace::new();
        let db = Database::open(ws.db_path()).unwrap();

        let mut batch = vec![
            reading(1, Duration::minutes(30)),
            reading(1, Duration::minutes(5)),
            reading(2, Duration::minutes(10)),
        ];
        db.append_readings(&mut batch).await.unwrap();

        let all = db.query_recent(1).await.unwrap();
        let order: Vec<u32> = all.iter().map(|r| r.intersection_id).collect();
        assert_eq!(order, vec![1, 2, 1]);
        assert!(all.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let only_one = db.query_recent_for(1, Some(1), None).await.unwrap();
        assert_eq!(only_one.len(), 2);
        assert!(only_one.iter().all(|r| r.intersection_id == 1));

        let capped = db.query_recent_for(1, None, Some(1)).await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].intersection_id, 1);
    }

    #[tokio::test]
    async fn test_out_of_range_window_is_rejected() {
        let ws = TestWorkspace::new();
        let db = Database::open(ws.db_path()).unwrap();

        let result = db.query_recent(3_000_000_000).await;
        assert!(matches!(result, Err(StorageError::InvalidData(_))));

        // the widest representable window still answers
        let mut batch = vec![reading(1, Duration::zero())];
        db.append_readings(&mut batch).await.unwrap();
        assert_eq!(db.query_recent(2_000_000_000).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let ws = TestWorkspace::new();
        let db = Database::open(ws.db_path()).unwrap();

        let shared = Uuid::new_v4();
        let mut batch = vec![reading(1, Duration::zero()), reading(2, Duration::zero())];
        batch[0].correlation_id = Some(shared);
        batch[1].correlation_id = Some(shared);

        assert!(db.append_readings(&mut batch).await.is_err());
        assert!(db.query_recent(1).await.unwrap().is_empty());
    }
}

//! Cycle orchestration
//!
//! One cycle: estimate every intersection, persist the batch, publish it when
//! the broker is connected, then replace the snapshot. Each stage degrades on
//! its own; a failing stage is logged and the next one still runs.
//!
//! Runs are serialized: a single worker owns the pipeline and consumes
//! `RunRequest`s from the interval scheduler and the command dispatcher.

use chrono::{DateTime, FixedOffset, Local, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::estimator::{self, RoutingSample};
use crate::export::SnapshotWriter;
use crate::gateway::Publisher;
use crate::intersections::{Intersection, ANKARA_INTERSECTIONS};
use crate::messages::{AlertMessage, Topics, TrafficDataMessage};
use crate::models::{BrokerMessage, Reading};
use crate::routing::RoutingClient;
use crate::storage::Database;

/// Bound on queued runs; extra command requests are coalesced.
pub const RUN_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRequest {
    Scheduled,
    Command,
}

/// Outcome of one cycle, for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub readings: usize,
    pub critical: usize,
    pub persisted: bool,
    pub published: usize,
    pub publish_failures: usize,
    pub exported: bool,
}

pub struct Pipeline<P: Publisher> {
    intersections: &'static [Intersection],
    routing: Option<RoutingClient>,
    db: Database,
    publisher: P,
    snapshot: SnapshotWriter,
    device_id: String,
    topics: Topics,
    rng: Box<dyn RngCore + Send + Sync>,
    storage_failures: u32,
    storage_failure_threshold: u32,
}

impl<P: Publisher> Pipeline<P> {
    pub fn new(
        config: &AgentConfig,
        db: Database,
        publisher: P,
        routing: Option<RoutingClient>,
    ) -> Self {
        Self {
            intersections: &ANKARA_INTERSECTIONS,
            routing,
            db,
            publisher,
            snapshot: SnapshotWriter::new(&config.snapshot_path),
            device_id: config.device_id.clone(),
            topics: Topics::for_device(&config.device_id),
            rng: Box::new(StdRng::from_entropy()),
            storage_failures: 0,
            storage_failure_threshold: config.storage_failure_alert_threshold.max(1),
        }
    }

    /// Replaces the random source (seeded runs).
    pub fn with_rng(mut self, rng: impl RngCore + Send + Sync + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn storage_failures(&self) -> u32 {
        self.storage_failures
    }

    /// Full cycle at local time `now`.
    pub async fn run_cycle(&mut self, now: DateTime<FixedOffset>) -> CycleReport {
        let readings = self.estimate_all(now).await;
        self.process(readings, now.with_timezone(&Utc)).await
    }

    /// One reading per intersection. A routing failure only drops the live
    /// sample for that intersection.
    pub async fn estimate_all(&mut self, now: DateTime<FixedOffset>) -> Vec<Reading> {
        let mut readings = Vec::with_capacity(self.intersections.len());

        for intersection in self.intersections {
            let sample = self.routing_sample(intersection).await;
            readings.push(estimator::estimate(
                &mut *self.rng,
                intersection,
                now,
                sample.as_ref(),
            ));
        }

        readings
    }

    async fn routing_sample(&self, intersection: &Intersection) -> Option<RoutingSample> {
        let client = self.routing.as_ref()?;
        match client.sample(intersection.latitude, intersection.longitude).await {
            Ok(sample) => Some(sample),
            Err(e) => {
                warn!("Routing lookup failed for {}: {}", intersection.name, e);
                None
            }
        }
    }

    /// Persist, publish, export an already estimated batch.
    pub async fn process(&mut self, mut readings: Vec<Reading>, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport {
            readings: readings.len(),
            critical: readings.iter().filter(|r| r.is_critical()).count(),
            ..CycleReport::default()
        };

        self.persist(&mut readings, &mut report).await;

        if self.publisher.is_connected() {
            let data = TrafficDataMessage::from_readings(&self.device_id, &readings, now);
            let data_topic = self.topics.data.clone();
            self.publish_json(&data_topic, &data, &mut report).await;

            if let Some(alert) = AlertMessage::for_critical(&readings, now) {
                warn!("{} critical intersections, sending alert", alert.affected_intersections.len());
                let alert_topic = self.topics.alerts.clone();
                self.publish_json(&alert_topic, &alert, &mut report).await;
            }
        } else {
            debug!("Broker not connected, skipping publish");
        }

        match self.snapshot.write(&readings, now).await {
            Ok(()) => report.exported = true,
            Err(e) => error!("Failed to write snapshot {}: {}", self.snapshot.path().display(), e),
        }

        info!(
            "Cycle done: {} readings, {} critical, persisted={}, published={}, exported={}",
            report.readings, report.critical, report.persisted, report.published, report.exported
        );
        report
    }

    async fn persist(&mut self, readings: &mut [Reading], report: &mut CycleReport) {
        match self.db.append_readings(readings).await {
            Ok(count) => {
                if self.storage_failures > 0 {
                    info!("Storage recovered after {} failed cycles", self.storage_failures);
                }
                self.storage_failures = 0;
                report.persisted = true;
                debug!("Stored {} readings", count);
            }
            Err(e) => {
                self.storage_failures += 1;
                if self.storage_failures >= self.storage_failure_threshold {
                    error!(
                        "Storage failing for {} consecutive cycles: {}",
                        self.storage_failures, e
                    );
                } else {
                    warn!("Failed to store readings: {}", e);
                }
            }
        }
    }

    /// Sends one document; only acknowledged sends are audited.
    async fn publish_json<T: Serialize>(&self, topic: &str, document: &T, report: &mut CycleReport) {
        let value = match serde_json::to_value(document) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to serialize message for {}: {}", topic, e);
                report.publish_failures += 1;
                return;
            }
        };
        let payload = value.to_string().into_bytes();

        match self.publisher.publish(topic, payload).await {
            Ok(()) => {
                report.published += 1;
                debug!("Published to {}", topic);
                if let Err(e) = self
                    .db
                    .append_broker_message(&BrokerMessage::published(topic, value))
                    .await
                {
                    error!("Failed to record publish on {}: {}", topic, e);
                }
            }
            Err(e) => {
                report.publish_failures += 1;
                error!("{}", e);
            }
        }
    }
}

/// Current wall-clock time with the host's UTC offset.
pub fn local_now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

/// The only task that runs cycles. Exits when every sender is dropped or
/// `stop` turns true; a cycle already running is finished, queued ones are not.
pub fn spawn_worker<P: Publisher>(
    mut pipeline: Pipeline<P>,
    mut requests: mpsc::Receiver<RunRequest>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<Pipeline<P>> {
    tokio::spawn(async move {
        loop {
            if *stop.borrow() {
                break;
            }
            let request = tokio::select! {
                biased;
                Ok(()) = stop.changed() => continue,
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            debug!("Starting {:?} cycle", request);
            pipeline.run_cycle(local_now()).await;
        }

        requests.close();
        let mut skipped = 0;
        while requests.try_recv().is_ok() {
            skipped += 1;
        }
        if skipped > 0 {
            info!("Skipped {} queued cycles on shutdown", skipped);
        }
        info!("Cycle worker stopped");
        pipeline
    })
}

/// Requests a run every `interval`; the first one is immediate.
pub fn spawn_scheduler(interval: Duration, requests: mpsc::Sender<RunRequest>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if requests.send(RunRequest::Scheduled).await.is_err() {
                debug!("Cycle worker gone, scheduler exiting");
                break;
            }
        }
    })
}

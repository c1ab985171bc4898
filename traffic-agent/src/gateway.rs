//! Broker gateway (AWS IoT Core over MQTT + mutual TLS)
//!
//! Owns the connection lifecycle:
//! - `connect` opens the TLS session, waits for CONNACK, subscribes to the
//!   device command topic and moves the event loop to a background task
//! - `publish` sends with QoS 1 and waits for the matching PUBACK
//! - inbound publishes are forwarded to a channel, never handled inline
//! - `disconnect` is best effort
//!
//! A gateway built with `offline` reports `Unavailable` and refuses publishes,
//! the rest of the pipeline keeps running without transmission.

use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration,
    Transport,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::BrokerSettings;
use crate::error::GatewayError;
use crate::messages::Topics;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE: Duration = Duration::from_secs(6);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Transport seam used by the pipeline.
pub trait Publisher: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayHealth {
    pub state: ConnectionState,
    pub publish_failed: bool,
    pub reconnects: u32,
    pub publish_failures: u32,
}

/// Raw message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

struct StatusTracker {
    state: Mutex<ConnectionState>,
    publish_failed: AtomicBool,
    reconnects: AtomicU32,
    publish_failures: AtomicU32,
}

impl StatusTracker {
    fn new(state: ConnectionState) -> Self {
        Self {
            state: Mutex::new(state),
            publish_failed: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
            publish_failures: AtomicU32::new(0),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn mark_publish_failed(&self) {
        self.publish_failed.store(true, Ordering::Relaxed);
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_publish_ok(&self) {
        self.publish_failed.store(false, Ordering::Relaxed);
    }

    fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GatewayHealth {
        GatewayHealth {
            state: self.state(),
            publish_failed: self.publish_failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

/// Matches publish requests to PUBACKs.
///
/// Requests are queued in send order; the event loop reports the packet id
/// of each outgoing publish in that same order, which binds the oldest queued
/// waiter to the id. The PUBACK for that id releases the waiter.
///
/// Failing the waiters does not cancel their packets: requests still in the
/// client channel go out later, and unacked packets are replayed when the
/// session resumes. Those sends are tracked as orphans so they never bind a
/// newer waiter.
#[derive(Default)]
struct AckTracker {
    queued: VecDeque<oneshot::Sender<()>>,
    in_flight: HashMap<u16, oneshot::Sender<()>>,
    orphaned_sends: usize,
    orphaned_ids: HashSet<u16>,
}

impl AckTracker {
    fn enqueue(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.queued.push_back(tx);
        rx
    }

    fn bind(&mut self, pkid: u16) {
        if self.orphaned_ids.contains(&pkid) {
            debug!("Replayed publish {} has no waiter", pkid);
            return;
        }
        if self.orphaned_sends > 0 {
            self.orphaned_sends -= 1;
            self.orphaned_ids.insert(pkid);
            return;
        }
        if let Some(waiter) = self.queued.pop_front() {
            self.in_flight.insert(pkid, waiter);
        }
    }

    fn complete(&mut self, pkid: u16) {
        if self.orphaned_ids.remove(&pkid) {
            return;
        }
        if let Some(waiter) = self.in_flight.remove(&pkid) {
            let _ = waiter.send(());
        }
    }

    /// Forgets the newest waiter whose request never reached the client.
    fn cancel_unsent(&mut self) {
        self.queued.pop_back();
    }

    /// Drops every waiter; their receivers resolve with an error.
    fn fail_all(&mut self) {
        self.orphaned_sends += self.queued.len();
        self.queued.clear();
        self.orphaned_ids.extend(self.in_flight.drain().map(|(pkid, _)| pkid));
    }
}

struct GatewayInner {
    device_id: String,
    topics: Topics,
    client: Option<AsyncClient>,
    status: StatusTracker,
    acks: Mutex<AckTracker>,
    // one publish in flight at a time keeps packet ids and waiters aligned
    publish_order: tokio::sync::Mutex<()>,
    publish_timeout: Duration,
    shutdown: AtomicBool,
}

impl GatewayInner {
    fn new(
        device_id: &str,
        client: Option<AsyncClient>,
        state: ConnectionState,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            topics: Topics::for_device(device_id),
            client,
            status: StatusTracker::new(state),
            acks: Mutex::new(AckTracker::default()),
            publish_order: tokio::sync::Mutex::new(()),
            publish_timeout,
            shutdown: AtomicBool::new(false),
        }
    }
}

#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Degraded gateway: no broker, every publish is refused.
    pub fn offline(device_id: &str) -> Self {
        Self {
            inner: Arc::new(GatewayInner::new(
                device_id,
                None,
                ConnectionState::Unavailable,
                Duration::ZERO,
            )),
        }
    }

    /// Opens the session and subscribes to the command topic. Inbound
    /// publishes are sent to `inbound`.
    pub async fn connect(
        settings: &BrokerSettings,
        publish_timeout: Duration,
        inbound: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<Self, GatewayError> {
        let tls = load_tls(settings).await?;
        let topics = Topics::for_device(&settings.client_id);

        let mut mqtt_options =
            MqttOptions::new(&settings.client_id, &settings.endpoint, settings.port);
        mqtt_options.set_keep_alive(KEEP_ALIVE);
        mqtt_options.set_clean_session(false);
        mqtt_options.set_transport(Transport::tls_with_config(tls));

        info!("Connecting to {}:{} as {}", settings.endpoint, settings.port, settings.client_id);

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10);

        match timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(GatewayError::Connect(format!(
                    "no CONNACK within {}s",
                    CONNECT_TIMEOUT.as_secs()
                )))
            }
        }

        client
            .subscribe(topics.commands.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|e| GatewayError::Connect(format!("subscribe failed: {e}")))?;

        info!("Connected to broker, subscribed to {}", topics.commands);

        let inner = Arc::new(GatewayInner::new(
            &settings.client_id,
            Some(client),
            ConnectionState::Connected,
            publish_timeout,
        ));

        tokio::spawn(drive_event_loop(eventloop, inner.clone(), inbound));

        Ok(Self { inner })
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn topics(&self) -> &Topics {
        &self.inner.topics
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.state()
    }

    pub fn health(&self) -> GatewayHealth {
        self.inner.status.snapshot()
    }

    async fn publish_document(&self, topic: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
        let Some(client) = &self.inner.client else {
            return Err(GatewayError::Unavailable("gateway is offline".into()));
        };
        if self.state() != ConnectionState::Connected {
            return Err(self.publish_failure(topic, "not connected".into()));
        }

        let _order = self.inner.publish_order.lock().await;
        let ack = self.inner.acks.lock().enqueue();

        if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, payload).await {
            self.inner.acks.lock().cancel_unsent();
            return Err(self.publish_failure(topic, e.to_string()));
        }

        match timeout(self.inner.publish_timeout, ack).await {
            Ok(Ok(())) => {
                self.inner.status.mark_publish_ok();
                debug!("PUBACK received for {}", topic);
                Ok(())
            }
            Ok(Err(_)) => Err(self.publish_failure(topic, "connection lost before PUBACK".into())),
            Err(_) => {
                self.inner.acks.lock().fail_all();
                Err(self.publish_failure(topic, "timed out waiting for PUBACK".into()))
            }
        }
    }

    fn publish_failure(&self, topic: &str, reason: String) -> GatewayError {
        self.inner.status.mark_publish_failed();
        GatewayError::Publish {
            topic: topic.to_string(),
            reason,
        }
    }

    /// Graceful close; failures are only logged.
    pub async fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(client) = &self.inner.client {
            match client.disconnect().await {
                Ok(()) => info!("Broker connection closed"),
                Err(e) => warn!("Broker disconnect failed: {}", e),
            }
            self.inner.status.set(ConnectionState::Disconnected);
        }
    }
}

impl Publisher for Gateway {
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send {
        self.publish_document(topic, payload)
    }
}

async fn load_tls(settings: &BrokerSettings) -> Result<TlsConfiguration, GatewayError> {
    let read = |path: &std::path::Path| {
        let path = path.to_path_buf();
        async move {
            tokio::fs::read(&path)
                .await
                .map_err(|e| GatewayError::Unavailable(format!("{}: {}", path.display(), e)))
        }
    };

    Ok(TlsConfiguration::Simple {
        ca: read(&settings.ca_path).await?,
        alpn: None,
        client_auth: Some((
            read(&settings.cert_path).await?,
            read(&settings.private_key_path).await?,
        )),
    })
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), GatewayError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(GatewayError::Connect(e.to_string())),
        }
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    inner: Arc<GatewayInner>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Received MQTT message on topic: {}", publish.topic);
                let message = InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if inbound.send(message).is_err() {
                    warn!("Inbound dispatcher gone, dropping message on {}", publish.topic);
                }
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => inner.acks.lock().bind(pkid),
            Ok(Event::Incoming(Packet::PubAck(ack))) => inner.acks.lock().complete(ack.pkid),
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                on_reconnect(&inner, connack.session_present);
            }
            Ok(_) => {}
            Err(e) => {
                if inner.shutdown.load(Ordering::SeqCst) {
                    info!("MQTT event loop stopped");
                    break;
                }
                error!("MQTT connection error: {}", e);
                inner.acks.lock().fail_all();
                inner.status.set(ConnectionState::Disconnected);
                inner.status.increment_reconnects();
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Handles a CONNACK after the initial connect. A fresh session has lost
/// the command subscription; returns whether it was renewed.
fn on_reconnect(inner: &GatewayInner, session_present: bool) -> bool {
    if inner.status.state() != ConnectionState::Connected {
        info!("Reconnected to broker");
        inner.status.set(ConnectionState::Connected);
    }
    if session_present {
        return false;
    }
    let Some(client) = &inner.client else {
        return false;
    };
    // the event loop drains this channel, so never await here
    match client.try_subscribe(inner.topics.commands.as_str(), QoS::AtLeastOnce) {
        Ok(()) => {
            info!("Session not resumed, resubscribing to {}", inner.topics.commands);
            true
        }
        Err(e) => {
            error!("Failed to resubscribe to {}: {}", inner.topics.commands, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_tracker_binds_in_send_order() {
        let mut acks = AckTracker::default();
        let mut first = acks.enqueue();
        let mut second = acks.enqueue();

        acks.bind(7);
        acks.bind(8);
        acks.complete(8);

        assert!(second.try_recv().is_ok());
        assert!(first.try_recv().is_err());

        acks.complete(7);
        assert!(first.try_recv().is_ok());
        assert!(acks.in_flight.is_empty());
    }

    #[test]
    fn test_ack_tracker_ignores_unknown_ids() {
        let mut acks = AckTracker::default();
        acks.bind(1);
        acks.complete(42);
        assert!(acks.queued.is_empty());
        assert!(acks.in_flight.is_empty());
    }

    #[test]
    fn test_fail_all_releases_waiters_with_error() {
        let mut acks = AckTracker::default();
        let queued = acks.enqueue();
        let bound = acks.enqueue();
        acks.bind(3);
        acks.fail_all();

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        assert!(rt.block_on(queued).is_err());
        assert!(rt.block_on(bound).is_err());
    }

    #[test]
    fn test_failed_waiters_never_bind_later_sends() {
        let mut acks = AckTracker::default();
        let stale = acks.enqueue();
        acks.fail_all();
        drop(stale);

        // the stale request leaves the channel first, then the new one
        let mut fresh = acks.enqueue();
        acks.bind(5);
        acks.bind(6);

        acks.complete(5);
        assert!(fresh.try_recv().is_err());
        acks.complete(6);
        assert!(fresh.try_recv().is_ok());
        assert!(acks.orphaned_ids.is_empty());
    }

    #[test]
    fn test_replayed_packet_is_ignored() {
        let mut acks = AckTracker::default();
        let _stale = acks.enqueue();
        acks.bind(3);
        acks.fail_all();

        // session resumes: packet 3 is sent again before the new request
        let mut fresh = acks.enqueue();
        acks.bind(3);
        acks.bind(4);

        acks.complete(3);
        assert!(fresh.try_recv().is_err());
        acks.complete(4);
        assert!(fresh.try_recv().is_ok());

        // packet id 3 is free for reuse once its PUBACK arrived
        let mut reused = acks.enqueue();
        acks.bind(3);
        acks.complete(3);
        assert!(reused.try_recv().is_ok());
    }

    #[test]
    fn test_unsent_request_is_not_orphaned() {
        let mut acks = AckTracker::default();
        let _rejected = acks.enqueue();
        acks.cancel_unsent();

        let mut next = acks.enqueue();
        acks.bind(1);
        acks.complete(1);
        assert!(next.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_only_without_session() {
        let options = MqttOptions::new("dev", "127.0.0.1", 1883);
        let (client, _eventloop) = AsyncClient::new(options, 10);
        let inner = GatewayInner::new(
            "dev",
            Some(client),
            ConnectionState::Disconnected,
            Duration::from_secs(1),
        );

        assert!(!on_reconnect(&inner, true));
        assert_eq!(inner.status.state(), ConnectionState::Connected);
        assert!(on_reconnect(&inner, false));

        let offline = GatewayInner::new("dev", None, ConnectionState::Disconnected, Duration::ZERO);
        assert!(!on_reconnect(&offline, false));
    }

    #[tokio::test]
    async fn test_offline_gateway_refuses_publish() {
        let gateway = Gateway::offline("dev");
        assert_eq!(gateway.state(), ConnectionState::Unavailable);
        assert!(!gateway.is_connected());
        assert_eq!(gateway.topics().data, "ankara-traffic/data/dev");

        let result = gateway.publish("ankara-traffic/data/dev", b"{}".to_vec()).await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));

        // offline disconnect is a no-op
        gateway.disconnect().await;
        assert_eq!(gateway.health().state, ConnectionState::Unavailable);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, "not a pem").unwrap();
            path
        };
        let settings = BrokerSettings {
            endpoint: "127.0.0.1".into(),
            port: 9,
            client_id: "dev".into(),
            cert_path: write("cert.pem"),
            private_key_path: write("key.pem"),
            ca_path: write("ca.pem"),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = Gateway::connect(&settings, Duration::from_secs(1), tx).await;
        assert!(matches!(result, Err(GatewayError::Connect(_))));
    }
}

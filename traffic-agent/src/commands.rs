//! Inbound command handling
//!
//! Every message on a subscribed topic is audited first, then interpreted.
//! `update_analysis` asks the cycle worker for an extra run; the request is
//! coalesced when a run is already queued.

use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::gateway::InboundMessage;
use crate::messages::{Command, CommandError};
use crate::models::BrokerMessage;
use crate::pipeline::RunRequest;
use crate::storage::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    RunQueued,
    RunAlreadyQueued,
    Ignored,
}

pub struct CommandDispatcher {
    db: Database,
    triggers: mpsc::Sender<RunRequest>,
}

impl CommandDispatcher {
    pub fn new(db: Database, triggers: mpsc::Sender<RunRequest>) -> Self {
        Self { db, triggers }
    }

    pub async fn on_message(&self, topic: &str, payload: &[u8]) -> Dispatch {
        let document = decode_payload(payload);

        if let Err(e) = self
            .db
            .append_broker_message(&BrokerMessage::received(topic, document.clone()))
            .await
        {
            error!("Failed to record inbound message on {}: {}", topic, e);
        }

        match Command::parse(&document) {
            Ok(Command::UpdateAnalysis) => self.request_run(),
            Ok(Command::Unknown(name)) => {
                warn!("Ignoring unknown command '{}' on {}", name, topic);
                Dispatch::Ignored
            }
            Err(CommandError::MissingCommand) => {
                debug!("Message on {} carries no command", topic);
                Dispatch::Ignored
            }
        }
    }

    fn request_run(&self) -> Dispatch {
        match self.triggers.try_send(RunRequest::Command) {
            Ok(()) => {
                info!("Analysis update requested");
                Dispatch::RunQueued
            }
            Err(TrySendError::Full(_)) => {
                info!("Analysis update requested, a run is already queued");
                Dispatch::RunAlreadyQueued
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Cycle worker stopped, dropping analysis request");
                Dispatch::Ignored
            }
        }
    }

    /// Consumes inbound messages until the gateway side closes.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            self.on_message(&message.topic, &message.payload).await;
        }
        debug!("Inbound channel closed, dispatcher exiting");
    }
}

/// JSON documents are kept as-is; anything else is stored as its text.
fn decode_payload(payload: &[u8]) -> Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

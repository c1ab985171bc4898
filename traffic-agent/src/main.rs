use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use traffic_agent::commands::CommandDispatcher;
use traffic_agent::gateway::Gateway;
use traffic_agent::pipeline::{spawn_scheduler, spawn_worker, Pipeline, RUN_QUEUE_CAPACITY};
use traffic_agent::routing::RoutingClient;
use traffic_agent::{AgentConfig, Database};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ankara_traffic_agent=info,traffic_agent=info")),
        )
        .init();

    info!("Ankara traffic agent starting...");

    let config = AgentConfig::load().await.context("Failed to load configuration")?;
    let db = Database::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    info!("Database ready at {}", db.path().display());

    let routing = match &config.routing_api_key {
        Some(key) => Some(
            RoutingClient::new(key.clone(), config.routing_timeout)
                .context("Failed to build routing client")?,
        ),
        None => {
            info!("GOOGLE_MAPS_API_KEY not set, using heuristic speeds only");
            None
        }
    };

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let gateway = match config.broker_settings() {
        Ok(settings) => match Gateway::connect(&settings, config.publish_timeout, inbound_tx).await {
            Ok(gateway) => gateway,
            Err(e) => {
                error!("{}, running offline", e);
                Gateway::offline(&config.device_id)
            }
        },
        Err(e) => {
            warn!("Broker not configured ({}), running offline", e);
            Gateway::offline(&config.device_id)
        }
    };

    let (run_tx, run_rx) = mpsc::channel(RUN_QUEUE_CAPACITY);
    let (stop_tx, stop_rx) = watch::channel(false);

    let dispatcher = CommandDispatcher::new(db.clone(), run_tx.clone());
    let dispatcher_task = tokio::spawn(dispatcher.run(inbound_rx));

    let pipeline = Pipeline::new(&config, db, gateway.clone(), routing);
    let worker = spawn_worker(pipeline, run_rx, stop_rx);
    let scheduler = spawn_scheduler(config.interval, run_tx);

    info!(
        "Running every {}s for device {}",
        config.interval.as_secs(),
        config.device_id
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    // queued runs are dropped; only the cycle in progress completes
    let _ = stop_tx.send(true);
    scheduler.abort();
    dispatcher_task.abort();
    match tokio::time::timeout(SHUTDOWN_GRACE, worker).await {
        Ok(Ok(_)) => info!("Agent stopped"),
        Ok(Err(e)) => error!("Cycle worker failed: {}", e),
        Err(_) => warn!("Cycle worker did not stop within {}s", SHUTDOWN_GRACE.as_secs()),
    }

    gateway.disconnect().await;

    Ok(())
}

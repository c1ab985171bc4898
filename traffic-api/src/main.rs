mod http;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use traffic_agent::{AgentConfig, Database};

use crate::http::{build_router, AppState};

const DEFAULT_PORT: u16 = 3001;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ankara_traffic_api=info,traffic_agent=info")),
        )
        .init();

    let config = AgentConfig::load().await.context("Failed to load configuration")?;
    let db = Database::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let app = build_router(AppState::new(&config.snapshot_path, db));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Traffic API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .context("HTTP server failed")?;

    info!("Traffic API stopped");
    Ok(())
}

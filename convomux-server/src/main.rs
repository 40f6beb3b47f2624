//! convomux - LLM-call interception and context reconstruction proxy
//!
//! Sits between a conversational-agent backend and its LLM provider,
//! records every provider call, correlates calls with conversation turns,
//! and serves a reconstruction API over the captured traffic.

mod handlers;
mod letta;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use convomux_core::{Config, Correlator, Database, Forwarder};

use crate::letta::LettaClient;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging (to file; stdout stays clean for service managers)
    let _log_guard = convomux_core::logging::init(&config.logging)
        .context("failed to initialize logging")?;

    tracing::info!("convomux starting up");

    // Open database
    let db_path = Config::database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create data directory")?;
    }
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    // Wire up the proxy forwarder and agent adapter
    let forwarder =
        Forwarder::new(&config.upstream).context("failed to create upstream forwarder")?;
    let agent = LettaClient::new(&config.agent).context("failed to create agent client")?;

    let state = AppState {
        db: Arc::new(db),
        correlator: Correlator::new(),
        forwarder: Arc::new(forwarder),
        agent: Arc::new(agent),
        source: config.agent.source,
    };

    server::start_server(&config.server, state)
        .await
        .context("server error")?;

    tracing::info!("convomux shutting down");
    Ok(())
}

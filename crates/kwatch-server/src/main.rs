// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of KWatch.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kwatch_core::relay::{HttpRelaySink, MemoryRelaySink, RelaySink};
use kwatch_server::config::ServerConfig;
use kwatch_server::db::Database;
use kwatch_server::scheduler::SchedulerService;
use kwatch_server::{AppState, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kwatch_server=info,kwatch_core=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "kwatch.toml".to_owned());
    info!(path = %config_path, "Loading configuration");
    let config = Arc::new(ServerConfig::from_file(&config_path)?);

    let db = Arc::new(Database::open(&config.database.path)?);
    info!(path = %config.database.path, "Database opened");
    db.seed_rules_if_empty(&config.schedules)?;

    let sink: Arc<dyn RelaySink> = match &config.relay_sink.base_url {
        Some(url) => {
            info!(url = %url, "Relay states will be written to remote store");
            Arc::new(HttpRelaySink::new(
                url.as_str(),
                config.relay_sink.auth_token.clone(),
                config.scheduler.sink_timeout(),
            )?)
        }
        None => {
            warn!("No relay_sink.base_url configured, relay states stay in memory");
            Arc::new(MemoryRelaySink::new())
        }
    };

    let state = AppState::new(Arc::clone(&config), db, sink)?;

    let scheduler = config.scheduler.enabled.then(|| {
        SchedulerService::start(Arc::clone(&state.gate), config.scheduler.interval())
    });

    let app = router(state);
    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(building = %config.building.name, "KWatch Server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

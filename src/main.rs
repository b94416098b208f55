// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! DD Dispatch API Server
//!
//! Queues ride requests for chapter events and dispatches them to
//! designated drivers.

use dd_dispatch::{
    config::{Config, StoreBackend},
    db::{DispatchStore, FirestoreDb, MemoryDb},
    services::{RosterService, StaticRoster},
    time_utils::SystemClock,
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        backend = ?config.store_backend,
        "Starting DD Dispatch API"
    );

    let (store, roster): (Arc<dyn DispatchStore>, Arc<dyn RosterService>) =
        match config.store_backend {
            StoreBackend::Firestore => {
                let db = Arc::new(
                    FirestoreDb::new(&config.gcp_project_id, config.dispatch.max_batch_size)
                        .await?,
                );
                tracing::info!(project = %config.gcp_project_id, "Firestore store initialized");
                (db.clone(), db)
            }
            StoreBackend::Memory => {
                let roster = match &config.roster_file {
                    Some(path) => {
                        tracing::info!(path = %path, "Loading roster");
                        StaticRoster::load_from_file(path)?
                    }
                    None => StaticRoster::new(),
                };
                tracing::warn!(
                    members = roster.member_count(),
                    "Using in-memory store; state is lost on restart"
                );
                (
                    Arc::new(MemoryDb::new(config.dispatch.max_batch_size)),
                    Arc::new(roster),
                )
            }
        };

    // Build shared state
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        roster,
        Arc::new(SystemClock),
    ));

    match state.scheduler() {
        Some(scheduler) => {
            scheduler.spawn();
        }
        None => tracing::info!("No live events configured; relying on /tasks triggers"),
    }

    // Build router
    let app = dd_dispatch::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dd_dispatch=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}

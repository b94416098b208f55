// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Task handler routes for an external scheduler.
//!
//! These run the same passes as the in-process scheduler, for deployments
//! that scale to zero and rely on Cloud Scheduler pings instead. They are
//! protected by the shared task token (see `middleware::tasks_auth`).

use crate::error::Result;
use crate::services::{CycleReport, SweepReport};
use crate::AppState;
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

/// Task handler routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/dispatch-cycle", post(dispatch_cycle))
        .route("/tasks/monitor-sweep", post(monitor_sweep))
}

#[derive(Debug, Deserialize, Validate)]
pub struct EventTaskPayload {
    #[validate(length(min = 1, max = 128))]
    pub event_id: String,
}

/// Refresh priorities and dispatch for one event.
async fn dispatch_cycle(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EventTaskPayload>,
) -> Result<Json<CycleReport>> {
    payload.validate()?;
    tracing::info!(event_id = %payload.event_id, "Dispatch cycle requested");
    Ok(Json(state.dispatcher.run_cycle(&payload.event_id).await?))
}

/// Run the activity monitor sweep for one event.
async fn monitor_sweep(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EventTaskPayload>,
) -> Result<Json<SweepReport>> {
    payload.validate()?;
    tracing::info!(event_id = %payload.event_id, "Monitor sweep requested");
    Ok(Json(state.monitor.sweep(&payload.event_id).await?))
}

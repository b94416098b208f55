// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Admin routes: driver enrollment and the alert inbox.

use crate::error::Result;
use crate::middleware::auth::{AuthUser, Role};
use crate::models::{AdminAlert, DriverAssignment};
use crate::services::DriverLoad;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/events/{event_id}/drivers",
            post(enroll_driver).get(list_drivers),
        )
        .route("/api/events/{event_id}/alerts", get(list_alerts))
        .route("/api/alerts/{alert_id}/read", post(mark_alert_read))
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnrollBody {
    #[validate(length(min = 1, max = 128))]
    pub driver_id: String,
}

async fn enroll_driver(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(event_id): Path<String>,
    Json(body): Json<EnrollBody>,
) -> Result<(StatusCode, Json<DriverAssignment>)> {
    user.require(Role::Admin)?;
    body.validate()?;

    let assignment = state
        .monitor
        .enroll_driver(&event_id, body.driver_id.trim())
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

async fn list_drivers(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<DriverLoad>>> {
    user.require(Role::Admin)?;
    Ok(Json(state.dispatcher.driver_loads(&event_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub unread: bool,
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(event_id): Path<String>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<AdminAlert>>> {
    user.require(Role::Admin)?;
    Ok(Json(state.monitor.alerts(&event_id, query.unread).await?))
}

async fn mark_alert_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(alert_id): Path<String>,
) -> Result<Json<AdminAlert>> {
    user.require(Role::Admin)?;
    let alert = state.monitor.mark_alert_read(&alert_id).await?;
    tracing::info!(alert_id = %alert.id, admin = %user.user_id, "Alert marked read");
    Ok(Json(alert))
}

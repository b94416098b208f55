// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for riders and drivers.

use crate::error::{AppError, Result};
use crate::middleware::auth::{AuthUser, Role};
use crate::models::{Ride, RideStatus};
use crate::services::QueueEntry;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/events/{event_id}/rides", post(request_ride))
        .route("/api/events/{event_id}/queue", get(get_queue))
        .route(
            "/api/events/{event_id}/drivers/me/active",
            put(set_driver_active),
        )
        .route("/api/rides/{ride_id}", delete(cancel_ride))
        .route("/api/rides/{ride_id}/position", get(get_position))
        .route("/api/rides/{ride_id}/advance", post(advance_ride))
}

// ─── Riders ──────────────────────────────────────────────────

/// Ride request body.
#[derive(Debug, Default, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RideRequestBody {
    #[serde(default)]
    pub emergency: bool,
    #[validate(length(max = 280))]
    pub reason: Option<String>,
}

async fn request_ride(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(event_id): Path<String>,
    Json(body): Json<RideRequestBody>,
) -> Result<(StatusCode, Json<Ride>)> {
    user.require(Role::Rider)?;
    body.validate()?;

    let ride = state
        .rides
        .request_ride(
            &event_id,
            &user.user_id,
            body.emergency,
            body.reason.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ride)))
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(ride_id): Path<String>,
) -> Result<Json<Ride>> {
    user.require(Role::Rider)?;
    Ok(Json(state.rides.cancel_ride(&ride_id, &user.user_id).await?))
}

/// Where a ride stands.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PositionResponse {
    pub ride_id: String,
    pub status: RideStatus,
    /// Absent once the ride has left the queue
    pub position: Option<usize>,
    pub priority: f64,
    pub assigned_driver_id: Option<String>,
}

/// Position is visible to the rider, the assigned driver, and admins.
async fn get_position(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(ride_id): Path<String>,
) -> Result<Json<PositionResponse>> {
    let view = state
        .rides
        .ride_view(&ride_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ride {}", ride_id)))?;

    let ride = &view.ride;
    let allowed = user.is_admin()
        || ride.rider_id == user.user_id
        || ride.assigned_driver_id.as_deref() == Some(user.user_id.as_str());
    if !allowed {
        return Err(AppError::Forbidden(format!("ride {}", ride_id)));
    }

    Ok(Json(PositionResponse {
        ride_id: view.ride.id.clone(),
        status: view.ride.status,
        position: view.position,
        priority: view.priority,
        assigned_driver_id: view.ride.assigned_driver_id.clone(),
    }))
}

// ─── Drivers ─────────────────────────────────────────────────

async fn advance_ride(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(ride_id): Path<String>,
) -> Result<Json<Ride>> {
    user.require(Role::Driver)?;
    Ok(Json(state.rides.advance_ride(&ride_id, &user.user_id).await?))
}

/// Full ranked queue, for drivers and admins only.
async fn get_queue(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<QueueEntry>>> {
    if user.role == Role::Rider {
        return Err(AppError::Forbidden(
            "riders can only see their own position".to_string(),
        ));
    }
    Ok(Json(state.rides.queue(&event_id).await?))
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ActiveBody {
    pub active: bool,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ActiveResponse {
    pub active: bool,
    pub changed: bool,
    pub toggle_count: u32,
}

async fn set_driver_active(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(event_id): Path<String>,
    Json(body): Json<ActiveBody>,
) -> Result<Json<ActiveResponse>> {
    user.require(Role::Driver)?;

    let outcome = state
        .monitor
        .set_active(&event_id, &user.user_id, body.active)
        .await?;

    Ok(Json(ActiveResponse {
        active: outcome.assignment.active,
        changed: outcome.changed,
        toggle_count: outcome.assignment.toggle_count,
    }))
}

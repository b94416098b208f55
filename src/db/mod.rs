// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer: the store interface the engine runs against, plus its
//! Firestore and in-memory implementations.
//!
//! The engine keeps no authoritative state of its own. Reads may be served
//! from a slightly stale snapshot; every write is a conditional
//! read-modify-write executed atomically by the store.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::{AppError, Result};
use crate::models::{AdminAlert, DriverAssignment, DriverMutation, Ride, RideStatus, RideTransition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Collection names as constants.
pub mod collections {
    pub const RIDES: &str = "rides";
    pub const DRIVER_ASSIGNMENTS: &str = "driver_assignments";
    pub const ADMIN_ALERTS: &str = "admin_alerts";
    /// One document per rider with an unfinished ride, keyed `{event}_{rider}`
    pub const OPEN_RIDES: &str = "open_rides";
    /// Roster members (read-only)
    pub const USERS: &str = "users";
    /// Event records (read-only)
    pub const EVENTS: &str = "events";
}

/// Decides, from the committed driver state, whether a driver write also
/// raises an alert. Evaluated inside the write's transaction, so the alert
/// lands if and only if the mutation does.
pub type AlertRule<'a> = &'a (dyn Fn(&DriverAssignment) -> Option<AdminAlert> + Send + Sync);

/// Guard evaluated inside the same transaction as the write it protects.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// Ride status is one of these.
    RideStatusIn(Vec<RideStatus>),
    /// Ride is assigned to this driver.
    AssignedTo(String),
    /// Ride was requested by this rider.
    RequestedBy(String),
    /// This driver's assignment in the ride's event is active.
    DriverActive(String),
    /// Driver assignment's active flag equals this value.
    DriverStateIs(bool),
    /// Driver has been inactive since exactly this instant and the episode
    /// has not been reported yet.
    DriverInactiveSince(DateTime<Utc>),
}

impl Precondition {
    /// Driver whose assignment must be read to evaluate a ride guard.
    pub fn driver_dependency(preconditions: &[Precondition]) -> Option<&str> {
        preconditions.iter().find_map(|p| match p {
            Precondition::DriverActive(driver_id) => Some(driver_id.as_str()),
            _ => None,
        })
    }
}

/// Check ride-level guards. `driver` is the assignment named by
/// [`Precondition::DriverActive`], if any, read in the same transaction.
pub fn check_ride_preconditions(
    ride: &Ride,
    driver: Option<&DriverAssignment>,
    preconditions: &[Precondition],
) -> Result<()> {
    for precondition in preconditions {
        match precondition {
            Precondition::RideStatusIn(allowed) => {
                if !allowed.contains(&ride.status) {
                    return Err(AppError::PreconditionFailed(format!(
                        "ride {} is {}",
                        ride.id, ride.status
                    )));
                }
            }
            Precondition::AssignedTo(driver_id) => {
                if ride.assigned_driver_id.as_deref() != Some(driver_id.as_str()) {
                    return Err(AppError::PreconditionFailed(format!(
                        "ride {} is not assigned to {}",
                        ride.id, driver_id
                    )));
                }
            }
            Precondition::RequestedBy(rider_id) => {
                if &ride.rider_id != rider_id {
                    return Err(AppError::Forbidden(format!(
                        "ride {} belongs to another rider",
                        ride.id
                    )));
                }
            }
            Precondition::DriverActive(driver_id) => match driver {
                Some(assignment) if assignment.active => {}
                Some(_) => {
                    return Err(AppError::PreconditionFailed(format!(
                        "driver {} is inactive",
                        driver_id
                    )))
                }
                None => {
                    return Err(AppError::PreconditionFailed(format!(
                        "driver {} is not enrolled in event {}",
                        driver_id, ride.event_id
                    )))
                }
            },
            Precondition::DriverStateIs(_) | Precondition::DriverInactiveSince(_) => {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "driver guard {:?} used on a ride write",
                    precondition
                )))
            }
        }
    }
    Ok(())
}

/// Check guards on a driver assignment write.
pub fn check_driver_preconditions(
    assignment: &DriverAssignment,
    preconditions: &[Precondition],
) -> Result<()> {
    for precondition in preconditions {
        match precondition {
            Precondition::DriverStateIs(active) => {
                if assignment.active != *active {
                    return Err(AppError::PreconditionFailed(format!(
                        "driver {} active={} (expected {})",
                        assignment.driver_id, assignment.active, active
                    )));
                }
            }
            Precondition::DriverInactiveSince(since) => {
                if assignment.active
                    || assignment.last_status_change_at != *since
                    || assignment.inactivity_alerted_at.is_some()
                {
                    return Err(AppError::PreconditionFailed(format!(
                        "driver {} inactivity episode changed",
                        assignment.driver_id
                    )));
                }
            }
            other => {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "ride guard {:?} used on a driver write",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// Ride query filter. Results are ordered by `requested_at` ascending.
#[derive(Debug, Clone, Default)]
pub struct RideFilter {
    pub event_id: String,
    /// Empty means any status.
    pub statuses: Vec<RideStatus>,
    pub rider_id: Option<String>,
    pub driver_id: Option<String>,
}

impl RideFilter {
    pub fn for_event(event_id: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[RideStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn with_rider(mut self, rider_id: &str) -> Self {
        self.rider_id = Some(rider_id.to_string());
        self
    }

    pub fn with_driver(mut self, driver_id: &str) -> Self {
        self.driver_id = Some(driver_id.to_string());
        self
    }

    pub fn matches(&self, ride: &Ride) -> bool {
        ride.event_id == self.event_id
            && (self.statuses.is_empty() || self.statuses.contains(&ride.status))
            && self
                .rider_id
                .as_deref()
                .map_or(true, |rider| ride.rider_id == rider)
            && self
                .driver_id
                .as_deref()
                .map_or(true, |driver| ride.assigned_driver_id.as_deref() == Some(driver))
    }
}

/// One operation in a bulk write. Each op is itself a guarded
/// read-modify-write; ops whose guard fails are skipped, not fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Persist a recomputed priority if the ride is still ranked.
    SetRidePriority { ride_id: String, priority: f64 },
    /// Close an expired toggle window.
    ResetToggleWindow {
        event_id: String,
        driver_id: String,
        at: DateTime<Utc>,
        window: chrono::Duration,
    },
}

/// Abstract persistent store.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    // ─── Rides ───────────────────────────────────────────────────

    async fn get_ride(&self, ride_id: &str) -> Result<Option<Ride>>;

    async fn query_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>>;

    /// Create a ride, together with `alert` if given, in one atomic write.
    ///
    /// Fails with `PreconditionFailed` if the id is taken and with
    /// `InvalidInput` if the rider already has an unfinished ride in the
    /// event. Nothing is written on failure.
    async fn insert_ride(&self, ride: &Ride, alert: Option<&AdminAlert>) -> Result<()>;

    /// Atomically check `preconditions` and apply `transition`.
    ///
    /// Completing a ride also bumps the assigned driver's completed-ride
    /// counter in the same transaction. Returns the updated ride; fails with
    /// `NotFound` or `PreconditionFailed` without writing anything.
    async fn update_ride(
        &self,
        ride_id: &str,
        preconditions: &[Precondition],
        transition: &RideTransition,
    ) -> Result<Ride>;

    /// Apply `ops` in chunks of at most the configured batch size, each chunk
    /// atomically. Returns how many ops were applied.
    async fn batch_write(&self, ops: &[BatchOp]) -> Result<usize>;

    // ─── Driver assignments ──────────────────────────────────────

    async fn get_driver(&self, event_id: &str, driver_id: &str)
        -> Result<Option<DriverAssignment>>;

    async fn query_drivers(&self, event_id: &str) -> Result<Vec<DriverAssignment>>;

    /// Create the assignment unless one already exists; returns the stored record.
    async fn enroll_driver(&self, assignment: &DriverAssignment) -> Result<DriverAssignment>;

    /// Atomically check `preconditions` and apply `mutation`.
    async fn update_driver(
        &self,
        event_id: &str,
        driver_id: &str,
        preconditions: &[Precondition],
        mutation: &DriverMutation,
    ) -> Result<DriverAssignment> {
        let no_alert = |_: &DriverAssignment| -> Option<AdminAlert> { None };
        self.update_driver_with_alert(event_id, driver_id, preconditions, mutation, &no_alert)
            .await
            .map(|(assignment, _)| assignment)
    }

    /// Like [`DispatchStore::update_driver`], but also persists whatever
    /// `alert_for` returns for the updated record in the same transaction.
    async fn update_driver_with_alert(
        &self,
        event_id: &str,
        driver_id: &str,
        preconditions: &[Precondition],
        mutation: &DriverMutation,
        alert_for: AlertRule<'_>,
    ) -> Result<(DriverAssignment, Option<AdminAlert>)>;

    // ─── Alerts ──────────────────────────────────────────────────

    /// Alerts for an event, newest first.
    async fn query_alerts(&self, event_id: &str, unread_only: bool) -> Result<Vec<AdminAlert>>;

    async fn mark_alert_read(&self, alert_id: &str) -> Result<AdminAlert>;

    // ─── Change feed ─────────────────────────────────────────────

    /// Revision counter that ticks whenever a ride or driver record changes.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ride(status: RideStatus, driver: Option<&str>) -> Ride {
        Ride {
            id: "r1".to_string(),
            rider_id: "rider".to_string(),
            event_id: "formal".to_string(),
            group_id: "alpha".to_string(),
            rider_class_rank: 1,
            same_group: true,
            assigned_driver_id: driver.map(String::from),
            status,
            priority: 0.0,
            is_emergency: false,
            emergency_reason: None,
            requested_at: Utc.with_ymd_and_hms(2026, 3, 1, 22, 0, 0).unwrap(),
            assigned_at: None,
            enroute_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn test_driver_active_guard() {
        let r = ride(RideStatus::Queued, None);
        let t = r.requested_at;
        let mut dd = DriverAssignment::enroll("formal", "dd-1", t);
        let guards = [
            Precondition::RideStatusIn(vec![RideStatus::Queued]),
            Precondition::DriverActive("dd-1".to_string()),
        ];

        assert!(check_ride_preconditions(&r, Some(&dd), &guards).is_ok());

        dd.active = false;
        assert!(matches!(
            check_ride_preconditions(&r, Some(&dd), &guards),
            Err(AppError::PreconditionFailed(_))
        ));
        assert!(matches!(
            check_ride_preconditions(&r, None, &guards),
            Err(AppError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn test_status_and_owner_guards() {
        let r = ride(RideStatus::Assigned, Some("dd-1"));
        assert!(check_ride_preconditions(
            &r,
            None,
            &[Precondition::RideStatusIn(vec![RideStatus::Queued])]
        )
        .is_err());
        assert!(check_ride_preconditions(&r, None, &[Precondition::AssignedTo("dd-2".into())]).is_err());
        assert!(matches!(
            check_ride_preconditions(&r, None, &[Precondition::RequestedBy("other".into())]),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_filter_matches() {
        let r = ride(RideStatus::Assigned, Some("dd-1"));
        assert!(RideFilter::for_event("formal").matches(&r));
        assert!(RideFilter::for_event("formal")
            .with_statuses(&RideStatus::ACTIVE)
            .with_driver("dd-1")
            .matches(&r));
        assert!(!RideFilter::for_event("formal").with_driver("dd-2").matches(&r));
        assert!(!RideFilter::for_event("other").matches(&r));
        assert!(!RideFilter::for_event("formal")
            .with_statuses(&[RideStatus::Queued])
            .matches(&r));
    }
}

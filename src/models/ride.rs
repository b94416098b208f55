// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride request model and its lifecycle state machine.

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Lifecycle of a ride.
///
/// `queued → assigned → enroute → completed`, plus `queued → cancelled` and
/// `assigned → cancelled`. `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Queued,
    Assigned,
    Enroute,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// Statuses that still occupy a driver or the queue.
    pub const ACTIVE: [RideStatus; 3] = [RideStatus::Queued, RideStatus::Assigned, RideStatus::Enroute];

    /// Statuses that compete in the ranked queue.
    pub const RANKABLE: [RideStatus; 2] = [RideStatus::Queued, RideStatus::Assigned];

    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn is_rankable(self) -> bool {
        matches!(self, RideStatus::Queued | RideStatus::Assigned)
    }

    /// Whether `self → next` is a legal single step.
    pub fn can_transition_to(self, next: RideStatus) -> bool {
        use RideStatus::*;
        matches!(
            (self, next),
            (Queued, Assigned)
                | (Assigned, Enroute)
                | (Enroute, Completed)
                | (Queued, Cancelled)
                | (Assigned, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Queued => "queued",
            RideStatus::Assigned => "assigned",
            RideStatus::Enroute => "enroute",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored ride record (document ID is `id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: String,
    pub rider_id: String,
    pub event_id: String,
    /// Rider's chapter
    pub group_id: String,
    /// Rider's class rank, captured at request time
    pub rider_class_rank: u8,
    /// Whether the rider belongs to the chapter hosting the event
    pub same_group: bool,
    #[serde(default)]
    pub assigned_driver_id: Option<String>,
    pub status: RideStatus,
    /// Last persisted priority; ranking always recomputes a live value
    pub priority: f64,
    pub is_emergency: bool,
    #[serde(default)]
    pub emergency_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub enroute_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// A single state change applied atomically by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum RideTransition {
    Assign { driver_id: String, at: DateTime<Utc> },
    StartTrip { at: DateTime<Utc> },
    Complete { at: DateTime<Utc> },
    Cancel { at: DateTime<Utc> },
    /// Persist a freshly computed priority; no status change.
    Reprioritize { priority: f64 },
}

impl RideTransition {
    pub fn target_status(&self) -> Option<RideStatus> {
        match self {
            RideTransition::Assign { .. } => Some(RideStatus::Assigned),
            RideTransition::StartTrip { .. } => Some(RideStatus::Enroute),
            RideTransition::Complete { .. } => Some(RideStatus::Completed),
            RideTransition::Cancel { .. } => Some(RideStatus::Cancelled),
            RideTransition::Reprioritize { .. } => None,
        }
    }
}

impl Ride {
    /// Latest lifecycle timestamp recorded so far.
    fn last_stamp(&self) -> DateTime<Utc> {
        [self.assigned_at, self.enroute_at, self.completed_at, self.cancelled_at]
            .into_iter()
            .flatten()
            .fold(self.requested_at, DateTime::max)
    }

    /// Apply a transition in memory, enforcing the state machine.
    ///
    /// Timestamps never move backwards: a skewed `at` is raised to the latest
    /// stamp already on the record. Once a ride leaves the ranked queue its
    /// stored priority is zeroed.
    pub fn apply(&mut self, transition: &RideTransition) -> Result<()> {
        if let Some(next) = transition.target_status() {
            if !self.status.can_transition_to(next) {
                return Err(AppError::PreconditionFailed(format!(
                    "ride {} cannot move from {} to {}",
                    self.id, self.status, next
                )));
            }
        }

        let floor = self.last_stamp();
        match transition {
            RideTransition::Assign { driver_id, at } => {
                self.assigned_driver_id = Some(driver_id.clone());
                self.assigned_at = Some((*at).max(floor));
            }
            RideTransition::StartTrip { at } => {
                self.enroute_at = Some((*at).max(floor));
            }
            RideTransition::Complete { at } => {
                self.completed_at = Some((*at).max(floor));
            }
            RideTransition::Cancel { at } => {
                self.cancelled_at = Some((*at).max(floor));
            }
            RideTransition::Reprioritize { priority } => {
                if !self.status.is_rankable() {
                    return Err(AppError::PreconditionFailed(format!(
                        "ride {} is {} and no longer ranked",
                        self.id, self.status
                    )));
                }
                self.priority = *priority;
            }
        }

        if let Some(next) = transition.target_status() {
            self.status = next;
            if !next.is_rankable() {
                self.priority = 0.0;
            }
        }

        Ok(())
    }
}

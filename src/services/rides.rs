// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride lifecycle: intake, cancellation, trip progress, and queue views.

use crate::config::DispatchConfig;
use crate::db::{DispatchStore, Precondition, RideFilter};
use crate::error::{AppError, Result};
use crate::models::{Ride, RideStatus, RideTransition};
use crate::services::load::DriverLoadEstimator;
use crate::services::monitor::{log_alert, ActivityMonitor};
use crate::services::priority::PriorityCalculator;
use crate::services::queue::QueueRanker;
use crate::services::retry::{retry_transient, RetryPolicy};
use crate::services::roster::RosterService;
use crate::time_utils::Clock;
use serde::Serialize;
use std::sync::Arc;

/// Highest class rank the roster may assign.
pub const MAX_CLASS_RANK: i32 = 10;

/// Longest accepted emergency reason, in characters.
pub const MAX_REASON_LEN: usize = 280;

/// One row of an event's queue display.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub position: usize,
    pub priority: f64,
    /// Minutes until the assigned driver clears their outstanding rides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_estimated_wait_minutes: Option<u32>,
    pub ride: Ride,
}

/// A single ride as its rider or driver sees it.
#[derive(Debug, Clone, Serialize)]
pub struct RideView {
    /// `None` once the ride is en route, finished, or cancelled
    pub position: Option<usize>,
    pub priority: f64,
    pub ride: Ride,
}

pub struct RideService {
    store: Arc<dyn DispatchStore>,
    roster: Arc<dyn RosterService>,
    clock: Arc<dyn Clock>,
    monitor: Arc<ActivityMonitor>,
    ranker: QueueRanker,
    estimator: DriverLoadEstimator,
    retry: RetryPolicy,
}

impl RideService {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        roster: Arc<dyn RosterService>,
        clock: Arc<dyn Clock>,
        monitor: Arc<ActivityMonitor>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            store,
            roster,
            clock,
            monitor,
            ranker: QueueRanker::new(PriorityCalculator::new(config)),
            estimator: DriverLoadEstimator::new(config.average_ride_minutes),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Queue a new ride for `rider_id`.
    ///
    /// The rider's class rank and chapter are captured from the roster at
    /// request time. A rider holds at most one unfinished ride per event.
    pub async fn request_ride(
        &self,
        event_id: &str,
        rider_id: &str,
        is_emergency: bool,
        emergency_reason: Option<&str>,
    ) -> Result<Ride> {
        let emergency_reason = match emergency_reason.map(str::trim) {
            Some(reason) if reason.chars().count() > MAX_REASON_LEN => {
                return Err(AppError::InvalidInput(format!(
                    "emergency reason longer than {} characters",
                    MAX_REASON_LEN
                )));
            }
            Some(reason) if is_emergency && !reason.is_empty() => Some(reason.to_string()),
            _ => None,
        };

        let event_group = self
            .roster
            .event_group(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event {}", event_id)))?;
        let member = self
            .roster
            .lookup_member(rider_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("rider {}", rider_id)))?;

        if !(0..=MAX_CLASS_RANK).contains(&member.class_rank) {
            return Err(AppError::InvalidInput(format!(
                "class rank {} out of range 0..={}",
                member.class_rank, MAX_CLASS_RANK
            )));
        }
        let class_rank = u8::try_from(member.class_rank)
            .map_err(|_| AppError::InvalidInput("class rank out of range".to_string()))?;

        let same_group = member.group_id == event_group;
        let now = self.clock.now();
        let ride = Ride {
            id: uuid::Uuid::new_v4().to_string(),
            rider_id: rider_id.to_string(),
            event_id: event_id.to_string(),
            group_id: member.group_id,
            rider_class_rank: class_rank,
            same_group,
            assigned_driver_id: None,
            status: RideStatus::Queued,
            priority: self
                .ranker
                .calculator()
                .priority(class_rank, 0.0, is_emergency, same_group),
            is_emergency,
            emergency_reason,
            requested_at: now,
            assigned_at: None,
            enroute_at: None,
            completed_at: None,
            cancelled_at: None,
        };

        // The store enforces one unfinished ride per rider and writes the
        // emergency alert in the same commit as the ride.
        let alert = is_emergency.then(|| self.monitor.emergency_alert(&ride));
        let inserted = retry_transient(self.retry, "insert_ride", || {
            self.store.insert_ride(&ride, alert.as_ref())
        })
        .await;
        if let Err(e) = inserted {
            // A retry after a lost acknowledgement finds its own write.
            let own_write = matches!(e, AppError::PreconditionFailed(_))
                && self
                    .store
                    .get_ride(&ride.id)
                    .await?
                    .is_some_and(|stored| stored.rider_id == ride.rider_id);
            if !own_write {
                return Err(e);
            }
        }

        tracing::info!(
            event_id,
            ride_id = %ride.id,
            rider_id,
            class_rank,
            same_group,
            emergency = is_emergency,
            priority = ride.priority,
            "Ride requested"
        );

        if let Some(alert) = &alert {
            log_alert(alert);
        }

        Ok(ride)
    }

    /// Rider cancels a ride that hasn't left yet.
    ///
    /// Races with an in-flight assignment are settled by the store: whichever
    /// commits first wins and the other fails its guard.
    pub async fn cancel_ride(&self, ride_id: &str, rider_id: &str) -> Result<Ride> {
        let preconditions = [
            Precondition::RequestedBy(rider_id.to_string()),
            Precondition::RideStatusIn(vec![RideStatus::Queued, RideStatus::Assigned]),
        ];
        let transition = RideTransition::Cancel {
            at: self.clock.now(),
        };
        let ride = retry_transient(self.retry, "cancel_ride", || {
            self.store.update_ride(ride_id, &preconditions, &transition)
        })
        .await?;

        tracing::info!(event_id = %ride.event_id, ride_id, rider_id, "Ride cancelled");
        Ok(ride)
    }

    /// Driver moves their ride one step: assigned to en route, or en route
    /// to completed.
    pub async fn advance_ride(&self, ride_id: &str, driver_id: &str) -> Result<Ride> {
        let current = self
            .store
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ride {}", ride_id)))?;

        let now = self.clock.now();
        let transition = match current.status {
            RideStatus::Assigned => RideTransition::StartTrip { at: now },
            RideStatus::Enroute => RideTransition::Complete { at: now },
            other => {
                return Err(AppError::PreconditionFailed(format!(
                    "ride {} is {}",
                    ride_id, other
                )))
            }
        };
        let preconditions = [
            Precondition::AssignedTo(driver_id.to_string()),
            Precondition::RideStatusIn(vec![current.status]),
        ];

        let ride = retry_transient(self.retry, "advance_ride", || {
            self.store.update_ride(ride_id, &preconditions, &transition)
        })
        .await?;

        tracing::info!(
            event_id = %ride.event_id,
            ride_id,
            driver_id,
            status = %ride.status,
            "Ride advanced"
        );
        Ok(ride)
    }

    pub async fn get_ride(&self, ride_id: &str) -> Result<Option<Ride>> {
        self.store.get_ride(ride_id).await
    }

    /// The ride with its live priority and queue position.
    pub async fn ride_view(&self, ride_id: &str) -> Result<Option<RideView>> {
        let Some(ride) = self.store.get_ride(ride_id).await? else {
            return Ok(None);
        };
        let now = self.clock.now();

        if !ride.status.is_rankable() {
            return Ok(Some(RideView {
                position: None,
                priority: ride.priority,
                ride,
            }));
        }

        let filter = RideFilter::for_event(&ride.event_id).with_statuses(&RideStatus::RANKABLE);
        let rides = self.store.query_rides(&filter).await?;
        let ranked = self.ranker.rank(&rides, now);
        let found = ranked.iter().find(|entry| entry.ride.id == ride.id);

        Ok(Some(RideView {
            position: found.map(|entry| entry.position),
            priority: found
                .map(|entry| entry.priority)
                .unwrap_or_else(|| self.ranker.live_priority(&ride, now)),
            ride,
        }))
    }

    /// 1-indexed queue position, or `None` if the ride isn't waiting (or
    /// doesn't exist).
    pub async fn position(&self, ride_id: &str) -> Result<Option<usize>> {
        Ok(self
            .ride_view(ride_id)
            .await?
            .and_then(|view| view.position))
    }

    /// Full ranked queue for an event.
    pub async fn queue(&self, event_id: &str) -> Result<Vec<QueueEntry>> {
        let filter = RideFilter::for_event(event_id).with_statuses(&RideStatus::ACTIVE);
        let rides = retry_transient(self.retry, "query_rides", || self.store.query_rides(&filter))
            .await?;
        let loads = self.estimator.counts_by_driver(&rides);
        let now = self.clock.now();

        Ok(self
            .ranker
            .rank(&rides, now)
            .into_iter()
            .map(|entry| QueueEntry {
                position: entry.position,
                priority: entry.priority,
                driver_estimated_wait_minutes: entry.ride.assigned_driver_id.as_deref().map(
                    |driver_id| {
                        self.estimator
                            .minutes_for(loads.get(driver_id).copied().unwrap_or(0))
                    },
                ),
                ride: entry.ride.clone(),
            })
            .collect())
    }
}

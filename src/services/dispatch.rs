// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride dispatcher.
//!
//! Handles the core workflow:
//! 1. Read a fresh snapshot of the event's active rides and drivers
//! 2. Rank the queue and take the highest-priority unassigned ride
//! 3. Pick the active driver with the lowest estimated wait
//! 4. Claim the ride with a guarded, atomic store write
//! 5. On a lost race, re-read and re-select (bounded attempts)

use crate::config::DispatchConfig;
use crate::db::{BatchOp, DispatchStore, Precondition, RideFilter};
use crate::error::{AppError, Result};
use crate::models::{DriverAssignment, Ride, RideStatus, RideTransition};
use crate::services::load::DriverLoadEstimator;
use crate::services::priority::PriorityCalculator;
use crate::services::queue::QueueRanker;
use crate::services::retry::{retry_transient, RetryPolicy};
use crate::time_utils::Clock;
use serde::Serialize;
use std::sync::Arc;

/// Priority changes smaller than this aren't worth a write.
const PRIORITY_EPSILON: f64 = 1e-6;

/// Result of one dispatch step. None of these are errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Assigned { ride: Ride, driver_id: String },
    /// A ride is waiting but no driver is active; it stays queued.
    NoDriverAvailable { ride_id: String },
    QueueEmpty,
    /// Every attempt lost a race to a concurrent writer; left for the next pass.
    Contended { ride_id: String },
}

/// Summary of a full dispatch pass over one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub event_id: String,
    /// Rides whose stored priority was refreshed
    pub reprioritized: usize,
    /// `(ride_id, driver_id)` pairs assigned during the pass
    pub assignments: Vec<(String, String)>,
    /// Why the pass stopped
    pub stopped_on: DispatchOutcome,
}

/// A driver with their current estimated wait.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverLoad {
    #[serde(flatten)]
    pub assignment: DriverAssignment,
    pub active_rides: usize,
    pub estimated_wait_minutes: u32,
}

/// Selects drivers and performs assignments against the shared store.
pub struct Dispatcher {
    store: Arc<dyn DispatchStore>,
    clock: Arc<dyn Clock>,
    ranker: QueueRanker,
    estimator: DriverLoadEstimator,
    retry: RetryPolicy,
    max_assign_attempts: u32,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn DispatchStore>, clock: Arc<dyn Clock>, config: &DispatchConfig) -> Self {
        Self {
            store,
            clock,
            ranker: QueueRanker::new(PriorityCalculator::new(config)),
            estimator: DriverLoadEstimator::new(config.average_ride_minutes),
            retry: RetryPolicy::from_config(config),
            max_assign_attempts: config.max_assign_attempts.max(1),
        }
    }

    pub fn ranker(&self) -> &QueueRanker {
        &self.ranker
    }

    /// Pick the active driver in `event_id` with the lowest estimated wait.
    ///
    /// Ties go to the lexicographically smallest driver ID, so the choice
    /// never depends on the order `candidates` arrive in.
    pub fn select_best_driver<'a>(
        &self,
        event_id: &str,
        candidates: &'a [DriverAssignment],
        active_rides: &[Ride],
    ) -> Option<&'a str> {
        let counts = self.estimator.counts_by_driver(active_rides);
        let wait_for = |driver: &DriverAssignment| {
            self.estimator
                .minutes_for(counts.get(driver.driver_id.as_str()).copied().unwrap_or(0))
        };

        candidates
            .iter()
            .filter(|driver| driver.active && driver.event_id == event_id)
            .min_by(|a, b| {
                wait_for(a)
                    .cmp(&wait_for(b))
                    .then_with(|| a.driver_id.cmp(&b.driver_id))
            })
            .map(|driver| driver.driver_id.as_str())
    }

    /// Atomically claim `ride_id` for `driver_id`.
    ///
    /// Succeeds only if, at commit time, the ride is still queued and the
    /// driver still active. Otherwise fails with `PreconditionFailed` (or
    /// `NotFound`) and writes nothing; the caller must re-run selection.
    pub async fn assign(&self, ride_id: &str, driver_id: &str) -> Result<Ride> {
        let preconditions = [
            Precondition::RideStatusIn(vec![RideStatus::Queued]),
            Precondition::DriverActive(driver_id.to_string()),
        ];
        let transition = RideTransition::Assign {
            driver_id: driver_id.to_string(),
            at: self.clock.now(),
        };

        retry_transient(self.retry, "assign_ride", || {
            self.store.update_ride(ride_id, &preconditions, &transition)
        })
        .await
    }

    async fn snapshot(&self, event_id: &str) -> Result<(Vec<Ride>, Vec<DriverAssignment>)> {
        let filter = RideFilter::for_event(event_id).with_statuses(&RideStatus::ACTIVE);
        let (rides, drivers) = tokio::try_join!(
            retry_transient(self.retry, "query_rides", || self.store.query_rides(&filter)),
            retry_transient(self.retry, "query_drivers", || self.store.query_drivers(event_id)),
        )?;
        Ok((rides, drivers))
    }

    /// Assign the highest-priority queued ride in `event_id`, if any driver
    /// can take it.
    pub async fn dispatch_next(&self, event_id: &str) -> Result<DispatchOutcome> {
        let mut last_ride_id = String::new();

        for attempt in 1..=self.max_assign_attempts {
            let (rides, drivers) = self.snapshot(event_id).await?;
            let now = self.clock.now();

            let ranked = self.ranker.rank(&rides, now);
            let Some(next) = ranked
                .iter()
                .find(|entry| entry.ride.status == RideStatus::Queued)
            else {
                return Ok(DispatchOutcome::QueueEmpty);
            };
            let ride_id = next.ride.id.clone();

            let Some(driver_id) = self.select_best_driver(event_id, &drivers, &rides) else {
                tracing::debug!(event_id, ride_id = %ride_id, "No active driver; ride stays queued");
                return Ok(DispatchOutcome::NoDriverAvailable { ride_id });
            };
            let driver_id = driver_id.to_string();

            match self.assign(&ride_id, &driver_id).await {
                Ok(ride) => {
                    tracing::info!(
                        event_id,
                        ride_id = %ride.id,
                        driver_id = %driver_id,
                        priority = next.priority,
                        emergency = ride.is_emergency,
                        "Ride assigned"
                    );
                    return Ok(DispatchOutcome::Assigned { ride, driver_id });
                }
                Err(e) if e.is_stale_view() => {
                    tracing::info!(
                        event_id,
                        ride_id = %ride_id,
                        driver_id = %driver_id,
                        attempt,
                        reason = %e,
                        "Assignment lost a race; re-selecting"
                    );
                    last_ride_id = ride_id;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(
            event_id,
            ride_id = %last_ride_id,
            attempts = self.max_assign_attempts,
            "Giving up on contended assignment until next pass"
        );
        Ok(DispatchOutcome::Contended {
            ride_id: last_ride_id,
        })
    }

    /// Every enrolled driver in the event with their current load.
    pub async fn driver_loads(&self, event_id: &str) -> Result<Vec<DriverLoad>> {
        let (rides, drivers) = self.snapshot(event_id).await?;
        let counts = self.estimator.counts_by_driver(&rides);
        Ok(drivers
            .into_iter()
            .map(|assignment| {
                let active_rides = counts
                    .get(assignment.driver_id.as_str())
                    .copied()
                    .unwrap_or(0);
                DriverLoad {
                    estimated_wait_minutes: self.estimator.minutes_for(active_rides),
                    active_rides,
                    assignment,
                }
            })
            .collect())
    }

    /// Recompute live priorities for the event's queue and persist any that
    /// moved. Returns how many rides were updated.
    pub async fn refresh_priorities(&self, event_id: &str) -> Result<usize> {
        let filter = RideFilter::for_event(event_id).with_statuses(&RideStatus::RANKABLE);
        let rides = retry_transient(self.retry, "query_rides", || self.store.query_rides(&filter))
            .await?;
        let now = self.clock.now();

        let ops: Vec<BatchOp> = self
            .ranker
            .rank(&rides, now)
            .into_iter()
            .filter(|entry| (entry.priority - entry.ride.priority).abs() > PRIORITY_EPSILON)
            .map(|entry| BatchOp::SetRidePriority {
                ride_id: entry.ride.id.clone(),
                priority: entry.priority,
            })
            .collect();

        if ops.is_empty() {
            return Ok(0);
        }

        let updated =
            retry_transient(self.retry, "batch_write", || self.store.batch_write(&ops)).await?;
        tracing::debug!(event_id, updated, "Priorities refreshed");
        Ok(updated)
    }

    /// Assign queued rides until the queue is empty, no driver is
    /// available, or contention stops progress.
    pub async fn dispatch_all(&self, event_id: &str) -> Result<(Vec<(String, String)>, DispatchOutcome)> {
        let mut assignments = Vec::new();
        loop {
            match self.dispatch_next(event_id).await? {
                DispatchOutcome::Assigned { ride, driver_id } => {
                    assignments.push((ride.id, driver_id));
                }
                other => return Ok((assignments, other)),
            }
        }
    }

    /// One periodic pass: refresh stored priorities, then dispatch.
    ///
    /// A failed priority refresh only affects what displays read back; the
    /// dispatch step recomputes priorities itself and still runs.
    pub async fn run_cycle(&self, event_id: &str) -> Result<CycleReport> {
        let reprioritized = match self.refresh_priorities(event_id).await {
            Ok(n) => n,
            Err(e) if matches!(e, AppError::Transient(_) | AppError::Database(_)) => {
                tracing::warn!(event_id, error = %e, "Priority refresh failed; dispatching anyway");
                0
            }
            Err(e) => return Err(e),
        };

        let (assignments, stopped_on) = self.dispatch_all(event_id).await?;

        if !assignments.is_empty() {
            tracing::info!(
                event_id,
                assigned = assignments.len(),
                reprioritized,
                "Dispatch cycle complete"
            );
        }

        Ok(CycleReport {
            event_id: event_id.to_string(),
            reprioritized,
            assignments,
            stopped_on,
        })
    }
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store.
//!
//! All records live behind one mutex, so every guarded write is trivially
//! atomic with respect to every other. Used by tests and by
//! `STORE_BACKEND=memory` for local runs.

use crate::config::STORE_MAX_BATCH_SIZE;
use crate::db::{
    check_driver_preconditions, check_ride_preconditions, AlertRule, BatchOp, DispatchStore,
    Precondition, RideFilter,
};
use crate::error::{AppError, Result};
use crate::models::{
    AdminAlert, DriverAssignment, DriverMutation, Ride, RideStatus, RideTransition,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Default)]
struct MemoryState {
    rides: HashMap<String, Ride>,
    /// Keyed by [`DriverAssignment::doc_id`]
    drivers: HashMap<String, DriverAssignment>,
    alerts: HashMap<String, AdminAlert>,
}

/// In-memory [`DispatchStore`].
pub struct MemoryDb {
    state: Mutex<MemoryState>,
    revision: watch::Sender<u64>,
    max_batch_size: usize,
    /// Number of upcoming writes that fail as transient (test builds only).
    #[cfg(test)]
    transient_failures: std::sync::atomic::AtomicU32,
    /// Number of upcoming writes carrying an alert that fail as transient.
    #[cfg(test)]
    alert_failures: std::sync::atomic::AtomicU32,
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new(STORE_MAX_BATCH_SIZE)
    }
}

impl MemoryDb {
    pub fn new(max_batch_size: usize) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Mutex::new(MemoryState::default()),
            revision,
            max_batch_size: max_batch_size.clamp(1, STORE_MAX_BATCH_SIZE),
            #[cfg(test)]
            transient_failures: std::sync::atomic::AtomicU32::new(0),
            #[cfg(test)]
            alert_failures: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Make the next `n` writes fail with a transient error (test builds only).
    #[cfg(test)]
    pub fn fail_next_writes(&self, n: u32) {
        self.transient_failures
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make the next `n` writes that would persist an alert fail with a
    /// transient error before writing anything (test builds only).
    #[cfg(test)]
    pub fn fail_next_alert_writes(&self, n: u32) {
        self.alert_failures
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<()> {
        #[cfg(test)]
        take_injected(&self.transient_failures)?;
        Ok(())
    }

    fn maybe_fail_alert(&self) -> Result<()> {
        #[cfg(test)]
        take_injected(&self.alert_failures)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("memory store lock poisoned")))
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

#[cfg(test)]
fn take_injected(counter: &std::sync::atomic::AtomicU32) -> Result<()> {
    use std::sync::atomic::Ordering;
    match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
        Ok(_) => Err(AppError::Transient("injected failure".to_string())),
        Err(_) => Ok(()),
    }
}

impl MemoryState {
    fn apply_ride(
        &mut self,
        ride_id: &str,
        preconditions: &[Precondition],
        transition: &RideTransition,
    ) -> Result<Ride> {
        let mut ride = self
            .rides
            .get(ride_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("ride {}", ride_id)))?;

        let driver = Precondition::driver_dependency(preconditions)
            .and_then(|driver_id| {
                self.drivers
                    .get(&DriverAssignment::doc_id(&ride.event_id, driver_id))
            })
            .cloned();
        check_ride_preconditions(&ride, driver.as_ref(), preconditions)?;

        ride.apply(transition)?;

        if matches!(transition, RideTransition::Complete { .. }) {
            if let Some(driver_id) = ride.assigned_driver_id.as_deref() {
                if let Some(assignment) = self
                    .drivers
                    .get_mut(&DriverAssignment::doc_id(&ride.event_id, driver_id))
                {
                    assignment.apply(&DriverMutation::RecordCompletedRide);
                }
            }
        }

        self.rides.insert(ride.id.clone(), ride.clone());
        Ok(ride)
    }

    /// Checked post-state of a driver write; nothing is stored.
    fn preview_driver(
        &self,
        event_id: &str,
        driver_id: &str,
        preconditions: &[Precondition],
        mutation: &DriverMutation,
    ) -> Result<DriverAssignment> {
        let mut assignment = self
            .drivers
            .get(&DriverAssignment::doc_id(event_id, driver_id))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("driver {} in event {}", driver_id, event_id))
            })?;
        check_driver_preconditions(&assignment, preconditions)?;
        assignment.apply(mutation);
        Ok(assignment)
    }

    fn apply_driver(
        &mut self,
        event_id: &str,
        driver_id: &str,
        preconditions: &[Precondition],
        mutation: &DriverMutation,
    ) -> Result<DriverAssignment> {
        let assignment = self.preview_driver(event_id, driver_id, preconditions, mutation)?;
        self.drivers.insert(
            DriverAssignment::doc_id(&assignment.event_id, &assignment.driver_id),
            assignment.clone(),
        );
        Ok(assignment)
    }

    fn open_ride_for(&self, event_id: &str, rider_id: &str) -> Option<&Ride> {
        self.rides.values().find(|r| {
            r.event_id == event_id && r.rider_id == rider_id && r.status.is_active()
        })
    }
}

#[async_trait]
impl DispatchStore for MemoryDb {
    async fn get_ride(&self, ride_id: &str) -> Result<Option<Ride>> {
        Ok(self.lock()?.rides.get(ride_id).cloned())
    }

    async fn query_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>> {
        let mut rides: Vec<Ride> = self
            .lock()?
            .rides
            .values()
            .filter(|ride| filter.matches(ride))
            .cloned()
            .collect();
        rides.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rides)
    }

    async fn insert_ride(&self, ride: &Ride, alert: Option<&AdminAlert>) -> Result<()> {
        self.maybe_fail()?;
        {
            let mut state = self.lock()?;
            if state.rides.contains_key(&ride.id) {
                return Err(AppError::PreconditionFailed(format!(
                    "ride {} already exists",
                    ride.id
                )));
            }
            if let Some(open) = state.open_ride_for(&ride.event_id, &ride.rider_id) {
                return Err(AppError::InvalidInput(format!(
                    "rider already has ride {} ({})",
                    open.id, open.status
                )));
            }
            if let Some(alert) = alert {
                self.maybe_fail_alert()?;
                state.alerts.insert(alert.id.clone(), alert.clone());
            }
            state.rides.insert(ride.id.clone(), ride.clone());
        }
        self.bump_revision();
        Ok(())
    }

    async fn update_ride(
        &self,
        ride_id: &str,
        preconditions: &[Precondition],
        transition: &RideTransition,
    ) -> Result<Ride> {
        self.maybe_fail()?;
        let ride = self.lock()?.apply_ride(ride_id, preconditions, transition)?;
        self.bump_revision();
        Ok(ride)
    }

    async fn batch_write(&self, ops: &[BatchOp]) -> Result<usize> {
        let mut applied = 0;

        for chunk in ops.chunks(self.max_batch_size) {
            self.maybe_fail()?;
            let mut chunk_applied = 0;
            {
                let mut state = self.lock()?;
                for op in chunk {
                    let outcome = match op {
                        BatchOp::SetRidePriority { ride_id, priority } => state
                            .apply_ride(
                                ride_id,
                                &[Precondition::RideStatusIn(RideStatus::RANKABLE.to_vec())],
                                &RideTransition::Reprioritize {
                                    priority: *priority,
                                },
                            )
                            .map(|_| ()),
                        BatchOp::ResetToggleWindow {
                            event_id,
                            driver_id,
                            at,
                            window,
                        } => state
                            .apply_driver(
                                event_id,
                                driver_id,
                                &[],
                                &DriverMutation::ResetToggleWindow {
                                    at: *at,
                                    window: *window,
                                },
                            )
                            .map(|_| ()),
                    };
                    match outcome {
                        Ok(()) => chunk_applied += 1,
                        Err(e) if e.is_stale_view() => {
                            tracing::debug!(op = ?op, error = %e, "Skipping stale batch op");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            applied += chunk_applied;
            if chunk_applied > 0 {
                self.bump_revision();
            }
        }

        Ok(applied)
    }

    async fn get_driver(
        &self,
        event_id: &str,
        driver_id: &str,
    ) -> Result<Option<DriverAssignment>> {
        Ok(self
            .lock()?
            .drivers
            .get(&DriverAssignment::doc_id(event_id, driver_id))
            .cloned())
    }

    async fn query_drivers(&self, event_id: &str) -> Result<Vec<DriverAssignment>> {
        let mut drivers: Vec<DriverAssignment> = self
            .lock()?
            .drivers
            .values()
            .filter(|d| d.event_id == event_id)
            .cloned()
            .collect();
        drivers.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
        Ok(drivers)
    }

    async fn enroll_driver(&self, assignment: &DriverAssignment) -> Result<DriverAssignment> {
        self.maybe_fail()?;
        let stored = {
            let mut state = self.lock()?;
            state
                .drivers
                .entry(DriverAssignment::doc_id(
                    &assignment.event_id,
                    &assignment.driver_id,
                ))
                .or_insert_with(|| assignment.clone())
                .clone()
        };
        self.bump_revision();
        Ok(stored)
    }

    async fn update_driver_with_alert(
        &self,
        event_id: &str,
        driver_id: &str,
        preconditions: &[Precondition],
        mutation: &DriverMutation,
        alert_for: AlertRule<'_>,
    ) -> Result<(DriverAssignment, Option<AdminAlert>)> {
        self.maybe_fail()?;
        let (assignment, alert) = {
            let mut state = self.lock()?;
            let assignment = state.preview_driver(event_id, driver_id, preconditions, mutation)?;
            let alert = alert_for(&assignment);
            if let Some(alert) = &alert {
                self.maybe_fail_alert()?;
                state.alerts.insert(alert.id.clone(), alert.clone());
            }
            state.drivers.insert(
                DriverAssignment::doc_id(&assignment.event_id, &assignment.driver_id),
                assignment.clone(),
            );
            (assignment, alert)
        };
        self.bump_revision();
        Ok((assignment, alert))
    }

    async fn query_alerts(&self, event_id: &str, unread_only: bool) -> Result<Vec<AdminAlert>> {
        let mut alerts: Vec<AdminAlert> = self
            .lock()?
            .alerts
            .values()
            .filter(|a| a.event_id == event_id && (!unread_only || !a.read))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(alerts)
    }

    async fn mark_alert_read(&self, alert_id: &str) -> Result<AdminAlert> {
        self.maybe_fail()?;
        let mut state = self.lock()?;
        let alert = state
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| AppError::NotFound(format!("alert {}", alert_id)))?;
        alert.read = true;
        Ok(alert.clone())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Driver activity monitoring.
//!
//! Two advisory checks, neither of which ever changes a ride or forces a
//! driver's status:
//! - toggle abuse: too many active-flag flips inside one monitoring window
//! - prolonged inactivity: inactive longer than the threshold, reported once
//!   per inactivity episode
//!
//! Toggle windows are fixed: a window opens at the first flip, counts every
//! flip until it has run its full length, and the next flip after that
//! opens a new one.
//!
//! Alerts are committed in the same store transaction as the driver write
//! that triggers them, and their ids are derived from the occurrence (window
//! or episode start), so a burst or an episode maps to exactly one alert
//! document.

use crate::config::DispatchConfig;
use crate::db::{BatchOp, DispatchStore, Precondition};
use crate::error::{AppError, Result};
use crate::models::{AdminAlert, AlertKind, DriverAssignment, DriverMutation, Ride};
use crate::services::retry::{retry_transient, RetryPolicy};
use crate::time_utils::Clock;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Result of a driver changing their active flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ToggleOutcome {
    pub assignment: DriverAssignment,
    /// Abuse alert raised by this flip, if it crossed the threshold
    pub alert: Option<AdminAlert>,
    /// False when the driver was already in the requested state
    pub changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub drivers_checked: usize,
    pub inactivity_alerts: usize,
    pub windows_reset: usize,
}

pub struct ActivityMonitor {
    store: Arc<dyn DispatchStore>,
    clock: Arc<dyn Clock>,
    toggle_window: Duration,
    toggle_threshold: u32,
    inactivity_threshold: Duration,
    retry: RetryPolicy,
}

impl ActivityMonitor {
    pub fn new(store: Arc<dyn DispatchStore>, clock: Arc<dyn Clock>, config: &DispatchConfig) -> Self {
        Self {
            store,
            clock,
            toggle_window: config.toggle_window(),
            toggle_threshold: config.toggle_threshold,
            inactivity_threshold: config.inactivity_threshold(),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Abuse alert for an assignment that was just toggled.
    ///
    /// Fires on the flip that takes the window's count past the threshold
    /// and not on later flips in the same window, so one burst of toggling
    /// yields one alert.
    pub fn record_toggle(&self, assignment: &DriverAssignment) -> Option<AdminAlert> {
        if assignment.toggle_count != self.toggle_threshold.saturating_add(1) {
            return None;
        }
        let at = assignment.last_status_change_at;
        let window_start = assignment.toggle_window_started_at.unwrap_or(at);
        Some(
            AdminAlert::new(
                &assignment.event_id,
                AlertKind::ToggleAbuse,
                format!(
                    "Driver {} toggled availability {} times within {} minutes",
                    assignment.driver_id,
                    assignment.toggle_count,
                    self.toggle_window.num_minutes()
                ),
                at,
            )
            .for_driver(&assignment.driver_id)
            .with_id(format!(
                "{}_{}_abuse_{}",
                assignment.event_id,
                assignment.driver_id,
                window_start.timestamp_millis()
            )),
        )
    }

    /// Inactivity alert if the driver has been inactive for longer than the
    /// threshold and this episode hasn't been reported.
    pub fn check_prolonged_inactivity(
        &self,
        assignment: &DriverAssignment,
        now: DateTime<Utc>,
    ) -> Option<AdminAlert> {
        if assignment.active || assignment.inactivity_alerted_at.is_some() {
            return None;
        }
        let idle = now - assignment.last_status_change_at;
        if idle <= self.inactivity_threshold {
            return None;
        }
        Some(
            AdminAlert::new(
                &assignment.event_id,
                AlertKind::ProlongedInactivity,
                format!(
                    "Driver {} has been inactive for {} minutes",
                    assignment.driver_id,
                    idle.num_minutes()
                ),
                now,
            )
            .for_driver(&assignment.driver_id)
            .with_id(format!(
                "{}_{}_inactive_{}",
                assignment.event_id,
                assignment.driver_id,
                assignment.last_status_change_at.timestamp_millis()
            )),
        )
    }

    /// Flip a driver's active flag.
    ///
    /// Setting the state the driver is already in is not a toggle: nothing
    /// is written and `changed` is false. An abuse alert is written with the
    /// flip that triggers it or not at all.
    pub async fn set_active(&self, event_id: &str, driver_id: &str, active: bool) -> Result<ToggleOutcome> {
        let mutation = DriverMutation::SetActive {
            active,
            at: self.clock.now(),
            window: self.toggle_window,
        };
        let preconditions = [Precondition::DriverStateIs(!active)];

        let alert_for = |assignment: &DriverAssignment| self.record_toggle(assignment);

        let updated = retry_transient(self.retry, "set_driver_active", || {
            self.store.update_driver_with_alert(
                event_id,
                driver_id,
                &preconditions,
                &mutation,
                &alert_for,
            )
        })
        .await;

        let (assignment, alert) = match updated {
            Ok(written) => written,
            Err(AppError::PreconditionFailed(_)) => {
                let current = self
                    .store
                    .get_driver(event_id, driver_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("driver {} in event {}", driver_id, event_id))
                    })?;
                return Ok(ToggleOutcome {
                    assignment: current,
                    alert: None,
                    changed: false,
                });
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            event_id,
            driver_id,
            active,
            toggle_count = assignment.toggle_count,
            "Driver availability changed"
        );

        if let Some(alert) = &alert {
            log_alert(alert);
        }

        Ok(ToggleOutcome {
            assignment,
            alert,
            changed: true,
        })
    }

    /// Operator alert for an emergency request. The caller stores it
    /// together with the ride.
    pub fn emergency_alert(&self, ride: &Ride) -> AdminAlert {
        let message = match ride.emergency_reason.as_deref() {
            Some(reason) => format!("Emergency ride request from {}: {}", ride.rider_id, reason),
            None => format!("Emergency ride request from {}", ride.rider_id),
        };
        AdminAlert::new(
            &ride.event_id,
            AlertKind::EmergencyRequest,
            message,
            ride.requested_at,
        )
        .for_ride(&ride.id)
        .with_id(format!("emergency_{}", ride.id))
    }

    /// Claim and report one inactivity episode.
    ///
    /// The claim is a guarded write on the episode's start time, so of any
    /// number of concurrent sweeps exactly one reports it. The alert is part
    /// of the claim: if it can't be stored the episode stays unclaimed and
    /// the next sweep tries again.
    async fn report_inactivity(&self, assignment: &DriverAssignment, now: DateTime<Utc>) -> Result<bool> {
        let Some(alert) = self.check_prolonged_inactivity(assignment, now) else {
            return Ok(false);
        };

        let preconditions = [Precondition::DriverInactiveSince(
            assignment.last_status_change_at,
        )];
        let mutation = DriverMutation::MarkInactivityAlerted { at: now };
        let alert_for = |_: &DriverAssignment| Some(alert.clone());
        let claimed = retry_transient(self.retry, "mark_inactivity_alerted", || {
            self.store.update_driver_with_alert(
                &assignment.event_id,
                &assignment.driver_id,
                &preconditions,
                &mutation,
                &alert_for,
            )
        })
        .await;

        match claimed {
            Ok(_) => {
                log_alert(&alert);
                Ok(true)
            }
            Err(e) if e.is_stale_view() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Periodic pass over one event's drivers: report new inactivity
    /// episodes and close expired toggle windows.
    pub async fn sweep(&self, event_id: &str) -> Result<SweepReport> {
        let drivers = retry_transient(self.retry, "query_drivers", || {
            self.store.query_drivers(event_id)
        })
        .await?;
        let now = self.clock.now();

        let mut report = SweepReport {
            drivers_checked: drivers.len(),
            ..Default::default()
        };

        for assignment in &drivers {
            if self.report_inactivity(assignment, now).await? {
                report.inactivity_alerts += 1;
            }
        }

        let resets: Vec<BatchOp> = drivers
            .iter()
            .filter(|d| d.toggle_window_expired(now, self.toggle_window))
            .map(|d| BatchOp::ResetToggleWindow {
                event_id: d.event_id.clone(),
                driver_id: d.driver_id.clone(),
                at: now,
                window: self.toggle_window,
            })
            .collect();
        if !resets.is_empty() {
            report.windows_reset =
                retry_transient(self.retry, "batch_write", || self.store.batch_write(&resets))
                    .await?;
        }

        if report.inactivity_alerts > 0 || report.windows_reset > 0 {
            tracing::info!(
                event_id,
                checked = report.drivers_checked,
                inactivity_alerts = report.inactivity_alerts,
                windows_reset = report.windows_reset,
                "Monitor sweep complete"
            );
        }
        Ok(report)
    }

    /// Admin enrollment. Re-enrolling returns the existing record untouched.
    pub async fn enroll_driver(&self, event_id: &str, driver_id: &str) -> Result<DriverAssignment> {
        let assignment = DriverAssignment::enroll(event_id, driver_id, self.clock.now());
        let stored = retry_transient(self.retry, "enroll_driver", || {
            self.store.enroll_driver(&assignment)
        })
        .await?;
        tracing::info!(event_id, driver_id, "Driver enrolled");
        Ok(stored)
    }

    pub async fn alerts(&self, event_id: &str, unread_only: bool) -> Result<Vec<AdminAlert>> {
        self.store.query_alerts(event_id, unread_only).await
    }

    pub async fn mark_alert_read(&self, alert_id: &str) -> Result<AdminAlert> {
        retry_transient(self.retry, "mark_alert_read", || {
            self.store.mark_alert_read(alert_id)
        })
        .await
    }
}

pub(crate) fn log_alert(alert: &AdminAlert) {
    tracing::warn!(
        event_id = %alert.event_id,
        kind = ?alert.kind,
        driver_id = alert.driver_id.as_deref().unwrap_or(""),
        ride_id = alert.ride_id.as_deref().unwrap_or(""),
        alert_id = %alert.id,
        "{}",
        alert.message
    );
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Driver ("DD") participation in one event.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// One driver's enrollment in one event.
///
/// Document ID: `{event_id}_{driver_id}` (see [`DriverAssignment::doc_id`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DriverAssignment {
    pub driver_id: String,
    pub event_id: String,
    pub active: bool,
    /// Active-flag flips inside the current monitoring window
    #[serde(default)]
    pub toggle_count: u32,
    /// Start of the current fixed monitoring window (None until first toggle)
    #[serde(default)]
    pub toggle_window_started_at: Option<DateTime<Utc>>,
    /// When `active` last changed (or enrollment time)
    pub last_status_change_at: DateTime<Utc>,
    /// Lifetime completed-ride counter
    #[serde(default)]
    pub completed_rides: u32,
    /// Set once the current inactivity episode has been reported
    #[serde(default)]
    pub inactivity_alerted_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
}

/// Atomic changes to a driver assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverMutation {
    SetActive {
        active: bool,
        at: DateTime<Utc>,
        window: Duration,
    },
    /// Close an expired monitoring window
    ResetToggleWindow { at: DateTime<Utc>, window: Duration },
    MarkInactivityAlerted { at: DateTime<Utc> },
    RecordCompletedRide,
}

impl DriverAssignment {
    /// Fresh, active enrollment.
    pub fn enroll(event_id: &str, driver_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            driver_id: driver_id.to_string(),
            event_id: event_id.to_string(),
            active: true,
            toggle_count: 0,
            toggle_window_started_at: None,
            last_status_change_at: at,
            completed_rides: 0,
            inactivity_alerted_at: None,
            enrolled_at: at,
        }
    }

    pub fn doc_id(event_id: &str, driver_id: &str) -> String {
        format!("{}_{}", event_id, driver_id)
    }

    /// Whether the monitoring window has run its full length as of `now`.
    pub fn toggle_window_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.toggle_window_started_at {
            Some(started) => now - started >= window,
            None => false,
        }
    }

    /// Toggle count as of `now`; zero once the window has expired.
    pub fn toggles_in_window(&self, now: DateTime<Utc>, window: Duration) -> u32 {
        if self.toggle_window_started_at.is_none() || self.toggle_window_expired(now, window) {
            0
        } else {
            self.toggle_count
        }
    }

    pub fn apply(&mut self, mutation: &DriverMutation) {
        match mutation {
            DriverMutation::SetActive { active, at, window } => {
                if *active == self.active {
                    return;
                }
                if self.toggle_window_started_at.is_none()
                    || self.toggle_window_expired(*at, *window)
                {
                    self.toggle_window_started_at = Some(*at);
                    self.toggle_count = 0;
                }
                self.toggle_count += 1;
                self.active = *active;
                self.last_status_change_at = *at;
                if *active {
                    self.inactivity_alerted_at = None;
                }
            }
            DriverMutation::ResetToggleWindow { at, window } => {
                if self.toggle_window_expired(*at, *window) {
                    self.toggle_window_started_at = None;
                    self.toggle_count = 0;
                }
            }
            DriverMutation::MarkInactivityAlerted { at } => {
                self.inactivity_alerted_at = Some(*at);
            }
            DriverMutation::RecordCompletedRide => {
                self.completed_rides += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 21, 0, 0).unwrap()
    }

    fn toggle(a: &mut DriverAssignment, active: bool, minutes: i64) {
        a.apply(&DriverMutation::SetActive {
            active,
            at: t0() + Duration::minutes(minutes),
            window: Duration::minutes(30),
        });
    }

    #[test]
    fn test_toggles_count_within_window() {
        let mut a = DriverAssignment::enroll("formal", "dd-1", t0());
        toggle(&mut a, false, 1);
        toggle(&mut a, true, 2);
        toggle(&mut a, false, 3);
        assert_eq!(a.toggle_count, 3);
        assert_eq!(a.toggle_window_started_at, Some(t0() + Duration::minutes(1)));
        assert!(!a.active);
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let mut a = DriverAssignment::enroll("formal", "dd-1", t0());
        toggle(&mut a, false, 0);
        toggle(&mut a, true, 10);
        toggle(&mut a, false, 31);
        assert_eq!(a.toggle_count, 1);
        assert_eq!(a.toggle_window_started_at, Some(t0() + Duration::minutes(31)));
    }

    #[test]
    fn test_same_state_is_not_a_toggle() {
        let mut a = DriverAssignment::enroll("formal", "dd-1", t0());
        toggle(&mut a, true, 5);
        assert_eq!(a.toggle_count, 0);
        assert_eq!(a.last_status_change_at, t0());
    }

    #[test]
    fn test_reactivation_clears_inactivity_alert() {
        let mut a = DriverAssignment::enroll("formal", "dd-1", t0());
        toggle(&mut a, false, 0);
        a.apply(&DriverMutation::MarkInactivityAlerted {
            at: t0() + Duration::minutes(16),
        });
        assert!(a.inactivity_alerted_at.is_some());
        toggle(&mut a, true, 20);
        assert!(a.inactivity_alerted_at.is_none());
    }

    #[test]
    fn test_toggles_in_window_reads_zero_after_expiry() {
        let mut a = DriverAssignment::enroll("formal", "dd-1", t0());
        toggle(&mut a, false, 0);
        toggle(&mut a, true, 1);
        let window = Duration::minutes(30);
        assert_eq!(a.toggles_in_window(t0() + Duration::minutes(29), window), 2);
        assert_eq!(a.toggles_in_window(t0() + Duration::minutes(30), window), 0);

        a.apply(&DriverMutation::ResetToggleWindow {
            at: t0() + Duration::minutes(45),
            window,
        });
        assert_eq!(a.toggle_count, 0);
        assert!(a.toggle_window_started_at.is_none());
    }
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Driver time-to-availability estimate.

use crate::models::{DriverAssignment, Ride};
use std::collections::HashMap;

/// Linear estimate: outstanding rides × average ride length.
///
/// Precision is traded for O(1) work per driver per dispatch pass.
#[derive(Debug, Clone, Copy)]
pub struct DriverLoadEstimator {
    average_ride_minutes: u32,
}

impl Default for DriverLoadEstimator {
    fn default() -> Self {
        Self::new(15)
    }
}

impl DriverLoadEstimator {
    pub fn new(average_ride_minutes: u32) -> Self {
        Self {
            average_ride_minutes,
        }
    }

    /// Rides assigned to `driver_id` that are not yet completed or cancelled.
    pub fn active_ride_count(&self, driver_id: &str, rides: &[Ride]) -> usize {
        rides
            .iter()
            .filter(|ride| {
                ride.status.is_active() && ride.assigned_driver_id.as_deref() == Some(driver_id)
            })
            .count()
    }

    /// Minutes until `assignment`'s driver is free; 0 means available now.
    pub fn estimated_wait(&self, assignment: &DriverAssignment, rides: &[Ride]) -> u32 {
        self.minutes_for(self.active_ride_count(&assignment.driver_id, rides))
    }

    pub fn minutes_for(&self, active_rides: usize) -> u32 {
        u32::try_from(active_rides)
            .unwrap_or(u32::MAX)
            .saturating_mul(self.average_ride_minutes)
    }

    /// Outstanding ride counts for every driver, in one pass over `rides`.
    pub fn counts_by_driver<'a>(&self, rides: &'a [Ride]) -> HashMap<&'a str, usize> {
        let mut counts = HashMap::new();
        for ride in rides.iter().filter(|ride| ride.status.is_active()) {
            if let Some(driver_id) = ride.assigned_driver_id.as_deref() {
                *counts.entry(driver_id).or_insert(0) += 1;
            }
        }
        counts
    }
}

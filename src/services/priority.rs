// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Priority scoring for waiting riders.

use crate::config::DispatchConfig;
use crate::time_utils::minutes_between;
use chrono::{DateTime, Utc};

/// Maps rider attributes and wait time to a priority score.
///
/// - emergency: the fixed sentinel, whatever else is true
/// - same chapter: `class_rank * class_weight + wait * wait_weight`
/// - other chapter: `wait * wait_weight` (drivers don't know outside hierarchy)
///
/// Ordinary scores are capped one point below the sentinel so no wait,
/// however long, ties with an emergency.
#[derive(Debug, Clone, Copy)]
pub struct PriorityCalculator {
    class_weight: f64,
    wait_weight: f64,
    emergency_priority: f64,
}

impl Default for PriorityCalculator {
    fn default() -> Self {
        Self::new(&DispatchConfig::default())
    }
}

impl PriorityCalculator {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            class_weight: config.class_weight,
            wait_weight: config.wait_weight,
            emergency_priority: config.emergency_priority,
        }
    }

    pub fn emergency_priority(&self) -> f64 {
        self.emergency_priority
    }

    /// Score a rider. Negative wait (clock skew) counts as zero.
    pub fn priority(
        &self,
        class_rank: u8,
        wait_minutes: f64,
        is_emergency: bool,
        is_same_group: bool,
    ) -> f64 {
        if is_emergency {
            return self.emergency_priority;
        }

        let wait = wait_minutes.max(0.0) * self.wait_weight;
        let score = if is_same_group {
            f64::from(class_rank) * self.class_weight + wait
        } else {
            wait
        };
        score.min(self.emergency_priority - 1.0)
    }

    /// Score a request as of `now`.
    pub fn priority_at(
        &self,
        class_rank: u8,
        requested_at: DateTime<Utc>,
        now: DateTime<Utc>,
        is_emergency: bool,
        is_same_group: bool,
    ) -> f64 {
        self.priority(
            class_rank,
            minutes_between(requested_at, now),
            is_emergency,
            is_same_group,
        )
    }
}

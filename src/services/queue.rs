// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Global queue ordering for an event.
//!
//! Ranking is a pure function of a ride snapshot and "now": priorities are
//! recomputed from wait time on every pass, never read back from storage.

use crate::models::Ride;
use crate::services::priority::PriorityCalculator;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// A ride with its live priority and 1-indexed queue position.
#[derive(Debug, Clone, Copy)]
pub struct RankedRide<'a> {
    pub ride: &'a Ride,
    pub priority: f64,
    pub position: usize,
}

/// Orders rankable rides (queued or assigned) for one event.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueRanker {
    calculator: PriorityCalculator,
}

impl QueueRanker {
    pub fn new(calculator: PriorityCalculator) -> Self {
        Self { calculator }
    }

    pub fn calculator(&self) -> &PriorityCalculator {
        &self.calculator
    }

    /// Priority of `ride` as of `now`.
    pub fn live_priority(&self, ride: &Ride, now: DateTime<Utc>) -> f64 {
        self.calculator.priority_at(
            ride.rider_class_rank,
            ride.requested_at,
            now,
            ride.is_emergency,
            ride.same_group,
        )
    }

    /// Total order over the rankable rides in `rides`.
    ///
    /// Priority descending, then `requested_at` ascending (FIFO among equal
    /// priorities, emergencies included), then ride ID so that even identical
    /// timestamps can't share a position. Rides in other statuses are dropped.
    pub fn rank<'a>(&self, rides: &'a [Ride], now: DateTime<Utc>) -> Vec<RankedRide<'a>> {
        let mut ranked: Vec<RankedRide<'a>> = rides
            .iter()
            .filter(|ride| ride.status.is_rankable())
            .map(|ride| RankedRide {
                ride,
                priority: self.live_priority(ride, now),
                position: 0,
            })
            .collect();

        ranked.sort_by(compare_ranked);

        for (idx, entry) in ranked.iter_mut().enumerate() {
            entry.position = idx + 1;
        }
        ranked
    }

    /// 1-indexed position of `ride_id`, or `None` if it isn't in the queue
    /// (finished, cancelled, en route, or unknown).
    pub fn position(&self, rides: &[Ride], ride_id: &str, now: DateTime<Utc>) -> Option<usize> {
        self.rank(rides, now)
            .into_iter()
            .find(|entry| entry.ride.id == ride_id)
            .map(|entry| entry.position)
    }
}

fn compare_ranked(a: &RankedRide<'_>, b: &RankedRide<'_>) -> Ordering {
    b.priority
        .total_cmp(&a.priority)
        .then_with(|| a.ride.requested_at.cmp(&b.ride.requested_at))
        .then_with(|| a.ride.id.cmp(&b.ride.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RideStatus;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap()
    }

    fn ride(id: &str, rank: u8, waited_min: i64, emergency: bool, same_group: bool) -> Ride {
        Ride {
            id: id.to_string(),
            rider_id: format!("rider-{}", id),
            event_id: "formal".to_string(),
            group_id: if same_group { "alpha" } else { "beta" }.to_string(),
            rider_class_rank: rank,
            same_group,
            assigned_driver_id: None,
            status: RideStatus::Queued,
            priority: 0.0,
            is_emergency: emergency,
            emergency_reason: None,
            requested_at: now() - Duration::minutes(waited_min),
            assigned_at: None,
            enroute_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    fn order(ranker: &QueueRanker, rides: &[Ride]) -> Vec<String> {
        ranker
            .rank(rides, now())
            .iter()
            .map(|r| r.ride.id.clone())
            .collect()
    }

    #[test]
    fn test_class_scenario_order() {
        let rides = vec![
            ride("freshman", 1, 15, false, true),
            ride("sophomore", 2, 5, false, true),
            ride("junior", 3, 5, false, true),
            ride("senior", 4, 5, false, true),
            ride("emergency", 0, 0, true, true),
        ];
        let ranker = QueueRanker::default();
        let ranked = ranker.rank(&rides, now());

        let summary: Vec<(&str, f64, usize)> = ranked
            .iter()
            .map(|r| (r.ride.id.as_str(), r.priority, r.position))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("emergency", 9999.0, 1),
                ("senior", 42.5, 2),
                ("junior", 35.0, 3),
                ("sophomore", 22.5, 4),
                ("freshman", 17.5, 5),
            ]
        );
    }

    #[test]
    fn test_cross_group_long_wait_outranks_fresh_freshman() {
        let rides = vec![
            ride("freshman", 1, 5, false, true),
            ride("guest", 4, 40, false, false),
        ];
        let ranker = QueueRanker::default();
        let ranked = ranker.rank(&rides, now());
        assert_eq!(ranked[0].ride.id, "guest");
        assert_eq!(ranked[0].priority, 20.0);
        assert_eq!(ranked[1].priority, 12.5);
    }

    #[test]
    fn test_simultaneous_emergencies_are_fifo() {
        let rides = vec![
            ride("second", 4, 2, true, true),
            ride("third", 4, 1, true, false),
            ride("first", 0, 3, true, true),
        ];
        assert_eq!(
            order(&QueueRanker::default(), &rides),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn test_identical_requests_fall_back_to_ride_id() {
        let rides = vec![
            ride("b-ride", 2, 10, false, true),
            ride("a-ride", 2, 10, false, true),
        ];
        let ranked = QueueRanker::default().rank(&rides, now());
        assert_eq!(ranked[0].ride.id, "a-ride");
        assert_eq!(ranked[1].position, 2);
    }

    #[test]
    fn test_positions_are_unique_and_dense() {
        let rides: Vec<Ride> = (0..20)
            .map(|i| ride(&format!("r{:02}", i), (i % 5) as u8, (i % 3) as i64, i % 7 == 0, i % 2 == 0))
            .collect();
        let ranked = QueueRanker::default().rank(&rides, now());
        let positions: Vec<usize> = ranked.iter().map(|r| r.position).collect();
        assert_eq!(positions, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_non_rankable_rides_have_no_position() {
        let mut enroute = ride("enroute", 4, 30, false, true);
        enroute.status = RideStatus::Enroute;
        let mut done = ride("done", 4, 30, false, true);
        done.status = RideStatus::Completed;
        let mut assigned = ride("assigned", 1, 1, false, true);
        assigned.status = RideStatus::Assigned;
        let rides = vec![enroute, done, assigned, ride("queued", 1, 2, false, true)];

        let ranker = QueueRanker::default();
        assert_eq!(ranker.position(&rides, "enroute", now()), None);
        assert_eq!(ranker.position(&rides, "done", now()), None);
        assert_eq!(ranker.position(&rides, "unknown", now()), None);
        assert_eq!(ranker.position(&rides, "queued", now()), Some(1));
        assert_eq!(ranker.position(&rides, "assigned", now()), Some(2));
    }

    #[test]
    fn test_rank_is_idempotent() {
        let rides = vec![
            ride("x", 3, 4, false, true),
            ride("y", 1, 30, false, false),
            ride("z", 2, 9, false, true),
        ];
        let ranker = QueueRanker::default();
        assert_eq!(order(&ranker, &rides), order(&ranker, &rides));
    }
}

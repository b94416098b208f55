// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dd_dispatch::config::DispatchConfig;
use dd_dispatch::db::MemoryDb;
use dd_dispatch::models::{DriverAssignment, Ride, RideStatus};
use dd_dispatch::services::{Dispatcher, PriorityCalculator, QueueRanker};
use dd_dispatch::time_utils::SystemClock;
use std::sync::Arc;

const RIDES: usize = 5_000;
const DRIVERS: usize = 200;

/// A busy event: a mix of classes, guests, a few emergencies, and a slice
/// of rides already handed to drivers.
fn busy_event(now: chrono::DateTime<Utc>) -> Vec<Ride> {
    (0..RIDES)
        .map(|i| {
            let assigned = i % 4 == 0;
            Ride {
                id: format!("ride-{:05}", i),
                rider_id: format!("rider-{}", i),
                event_id: "formal".to_string(),
                group_id: if i % 7 == 0 { "beta" } else { "alpha" }.to_string(),
                rider_class_rank: (i % 5) as u8,
                same_group: i % 7 != 0,
                assigned_driver_id: assigned.then(|| format!("dd-{:03}", i % DRIVERS)),
                status: if assigned {
                    RideStatus::Assigned
                } else {
                    RideStatus::Queued
                },
                priority: 0.0,
                is_emergency: i % 997 == 0,
                emergency_reason: None,
                requested_at: now - Duration::seconds((i * 7 % 3600) as i64),
                assigned_at: None,
                enroute_at: None,
                completed_at: None,
                cancelled_at: None,
            }
        })
        .collect()
}

fn benchmark_queue(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
    let rides = busy_event(now);
    let config = DispatchConfig::default();

    let ranker = QueueRanker::new(PriorityCalculator::new(&config));
    let dispatcher = Dispatcher::new(
        Arc::new(MemoryDb::default()),
        Arc::new(SystemClock),
        &config,
    );
    let drivers: Vec<_> = (0..DRIVERS)
        .map(|i| {
            let mut driver = DriverAssignment::enroll("formal", &format!("dd-{:03}", i), now);
            driver.active = i % 10 != 0;
            driver
        })
        .collect();

    let mut group = c.benchmark_group("dispatch_queue");

    group.bench_function("rank_5000_rides", |b| {
        b.iter(|| ranker.rank(black_box(&rides), now).len())
    });

    group.bench_function("position_of_last_ride", |b| {
        b.iter(|| ranker.position(black_box(&rides), "ride-04999", now))
    });

    group.bench_function("select_best_of_200_drivers", |b| {
        b.iter(|| dispatcher.select_best_driver("formal", black_box(&drivers), black_box(&rides)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_queue);
criterion_main!(benches);

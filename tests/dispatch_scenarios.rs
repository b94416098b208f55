// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end dispatch scenarios against the in-memory store.

use chrono::Duration;
use dd_dispatch::db::DispatchStore;
use dd_dispatch::error::AppError;
use dd_dispatch::models::{AlertKind, RideStatus};
use dd_dispatch::services::DispatchOutcome;
use std::sync::Arc;

mod common;

#[tokio::test]
async fn test_class_night_positions_and_dispatch_order() {
    let app = common::create_test_app();
    let rides = &app.state.rides;

    let freshman = rides.request_ride("formal", "freshman", false, None).await.unwrap();
    app.clock.advance(Duration::minutes(10));
    let senior = rides.request_ride("formal", "senior", false, None).await.unwrap();
    let junior = rides.request_ride("formal", "junior", false, None).await.unwrap();
    let sophomore = rides.request_ride("formal", "sophomore", false, None).await.unwrap();
    app.clock.advance(Duration::minutes(5));
    let emergency = rides
        .request_ride("formal", "guest", true, Some("lost phone and keys"))
        .await
        .unwrap();

    let queue = rides.queue("formal").await.unwrap();
    let order: Vec<(&str, f64, usize)> = queue
        .iter()
        .map(|e| (e.ride.rider_id.as_str(), e.priority, e.position))
        .collect();
    assert_eq!(
        order,
        vec![
            ("guest", 9999.0, 1),
            ("senior", 42.5, 2),
            ("junior", 35.0, 3),
            ("sophomore", 22.5, 4),
            ("freshman", 17.5, 5),
        ]
    );
    assert_eq!(rides.position(&sophomore.id).await.unwrap(), Some(4));

    app.state.monitor.enroll_driver("formal", "dd-1").await.unwrap();
    let report = app.state.dispatcher.run_cycle("formal").await.unwrap();
    let assigned: Vec<&str> = report.assignments.iter().map(|(r, _)| r.as_str()).collect();
    assert_eq!(
        assigned,
        vec![
            emergency.id.as_str(),
            senior.id.as_str(),
            junior.id.as_str(),
            sophomore.id.as_str(),
            freshman.id.as_str(),
        ]
    );
    assert_eq!(report.stopped_on, DispatchOutcome::QueueEmpty);

    let alerts = app.state.monitor.alerts("formal", true).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::EmergencyRequest);
}

#[tokio::test]
async fn test_long_waiting_guest_overtakes_fresh_member() {
    let app = common::create_test_app();
    let rides = &app.state.rides;

    let guest = rides.request_ride("formal", "guest", false, None).await.unwrap();
    app.clock.advance(Duration::minutes(35));
    let freshman = rides.request_ride("formal", "freshman", false, None).await.unwrap();
    app.clock.advance(Duration::minutes(5));

    let queue = rides.queue("formal").await.unwrap();
    assert_eq!(queue[0].ride.id, guest.id);
    assert_eq!(queue[0].priority, 20.0);
    assert_eq!(queue[1].ride.id, freshman.id);
    assert_eq!(queue[1].priority, 12.5);
}

#[tokio::test]
async fn test_no_driver_then_driver_arrives() {
    let app = common::create_test_app();
    let ride = app
        .state
        .rides
        .request_ride("formal", "junior", false, None)
        .await
        .unwrap();

    app.state.monitor.enroll_driver("formal", "dd-1").await.unwrap();
    app.state
        .monitor
        .set_active("formal", "dd-1", false)
        .await
        .unwrap();
    assert_eq!(
        app.state.dispatcher.dispatch_next("formal").await.unwrap(),
        DispatchOutcome::NoDriverAvailable {
            ride_id: ride.id.clone()
        }
    );

    app.state
        .monitor
        .set_active("formal", "dd-1", true)
        .await
        .unwrap();
    match app.state.dispatcher.dispatch_next("formal").await.unwrap() {
        DispatchOutcome::Assigned { ride: assigned, driver_id } => {
            assert_eq!(assigned.id, ride.id);
            assert_eq!(driver_id, "dd-1");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_assign_has_single_winner() {
    let app = common::create_test_app();
    for driver in ["dd-1", "dd-2"] {
        app.state.monitor.enroll_driver("formal", driver).await.unwrap();
    }

    let riders = ["senior", "junior", "sophomore", "freshman", "guest"];
    for rider in riders {
        let ride = app
            .state
            .rides
            .request_ride("formal", rider, false, None)
            .await
            .unwrap();

        let a = {
            let dispatcher = Arc::clone(&app.state.dispatcher);
            let ride_id = ride.id.clone();
            tokio::spawn(async move { dispatcher.assign(&ride_id, "dd-1").await })
        };
        let b = {
            let dispatcher = Arc::clone(&app.state.dispatcher);
            let ride_id = ride.id.clone();
            tokio::spawn(async move { dispatcher.assign(&ride_id, "dd-2").await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1, "ride {} assigned twice", ride.id);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::PreconditionFailed(_)))));

        let stored = app.store.get_ride(&ride.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RideStatus::Assigned);
        assert_eq!(stored.assigned_driver_id, winners[0].assigned_driver_id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatchers_never_double_assign() {
    let app = common::create_test_app();
    for driver in ["dd-1", "dd-2", "dd-3"] {
        app.state.monitor.enroll_driver("formal", driver).await.unwrap();
    }
    for rider in ["senior", "junior", "sophomore", "freshman", "guest"] {
        app.state
            .rides
            .request_ride("formal", rider, false, None)
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let dispatcher = Arc::clone(&app.state.dispatcher);
            tokio::spawn(async move { dispatcher.run_cycle("formal").await })
        })
        .collect();

    let mut assigned_rides = Vec::new();
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assigned_rides.extend(report.assignments.into_iter().map(|(ride, _)| ride));
    }

    assigned_rides.sort();
    let total = assigned_rides.len();
    assigned_rides.dedup();
    assert_eq!(total, assigned_rides.len(), "a ride was assigned twice");

    // Whatever contention left behind, one more pass finishes the queue.
    app.state.dispatcher.run_cycle("formal").await.unwrap();
    let queue = app.state.rides.queue("formal").await.unwrap();
    assert_eq!(queue.len(), 5);
    assert!(queue.iter().all(|e| e.ride.status == RideStatus::Assigned));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_racing_assign_never_resurrects() {
    let app = common::create_test_app();
    app.state.monitor.enroll_driver("formal", "dd-1").await.unwrap();

    for _ in 0..20 {
        let ride = app
            .state
            .rides
            .request_ride("formal", "senior", false, None)
            .await
            .unwrap();

        let assign = {
            let dispatcher = Arc::clone(&app.state.dispatcher);
            let ride_id = ride.id.clone();
            tokio::spawn(async move { dispatcher.assign(&ride_id, "dd-1").await })
        };
        let cancel = {
            let state = Arc::clone(&app.state);
            let ride_id = ride.id.clone();
            tokio::spawn(async move { state.rides.cancel_ride(&ride_id, "senior").await })
        };
        let _ = assign.await.unwrap();
        cancel.await.unwrap().unwrap();

        let stored = app.store.get_ride(&ride.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RideStatus::Cancelled);
        assert_eq!(app.state.rides.position(&ride.id).await.unwrap(), None);
    }
}

#[tokio::test]
async fn test_toggle_abuse_scenario() {
    let app = common::create_test_app();
    app.state.monitor.enroll_driver("formal", "dd-1").await.unwrap();
    app.state.monitor.enroll_driver("formal", "dd-2").await.unwrap();

    let mut abuse = Vec::new();
    for i in 0..6 {
        app.clock.advance(Duration::minutes(1));
        let outcome = app
            .state
            .monitor
            .set_active("formal", "dd-1", i % 2 == 1)
            .await
            .unwrap();
        abuse.extend(outcome.alert);
    }
    for i in 0..4 {
        app.clock.advance(Duration::minutes(1));
        let outcome = app
            .state
            .monitor
            .set_active("formal", "dd-2", i % 2 == 1)
            .await
            .unwrap();
        assert!(outcome.alert.is_none());
    }

    assert_eq!(abuse.len(), 1);
    let alerts = app.state.monitor.alerts("formal", false).await.unwrap();
    let flagged: Vec<_> = alerts
        .iter()
        .filter(|a| a.kind == AlertKind::ToggleAbuse)
        .filter_map(|a| a.driver_id.as_deref())
        .collect();
    assert_eq!(flagged, vec!["dd-1"]);
}

#[tokio::test]
async fn test_trip_completion_frees_driver() {
    let app = common::create_test_app();
    app.state.monitor.enroll_driver("formal", "dd-1").await.unwrap();
    app.state.monitor.enroll_driver("formal", "dd-2").await.unwrap();

    let first = app
        .state
        .rides
        .request_ride("formal", "senior", false, None)
        .await
        .unwrap();
    app.state.dispatcher.dispatch_next("formal").await.unwrap();
    let stored = app.store.get_ride(&first.id).await.unwrap().unwrap();
    assert_eq!(stored.assigned_driver_id.as_deref(), Some("dd-1"));

    app.state.rides.advance_ride(&first.id, "dd-1").await.unwrap();
    app.clock.advance(Duration::minutes(12));
    app.state.rides.advance_ride(&first.id, "dd-1").await.unwrap();

    // dd-1 is free again and wins the tie on driver ID.
    let second = app
        .state
        .rides
        .request_ride("formal", "junior", false, None)
        .await
        .unwrap();
    match app.state.dispatcher.dispatch_next("formal").await.unwrap() {
        DispatchOutcome::Assigned { ride, driver_id } => {
            assert_eq!(ride.id, second.id);
            assert_eq!(driver_id, "dd-1");
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let loads = app.state.dispatcher.driver_loads("formal").await.unwrap();
    assert_eq!(loads[0].assignment.completed_rides, 1);
    assert_eq!(loads[0].estimated_wait_minutes, 15);
    assert_eq!(loads[1].estimated_wait_minutes, 0);
}

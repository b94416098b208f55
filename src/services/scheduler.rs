// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Background dispatch loop for live events.
//!
//! Two triggers drive the work:
//! - a fixed interval: refresh priorities, dispatch, and run the monitor sweep
//! - a new ride snapshot for an event: dispatch that event only, so newly
//!   queued rides and newly active drivers are matched without waiting for
//!   the next tick
//!
//! Snapshots with nothing queued are skipped, and a dispatch pass that
//! writes nothing produces no revision, so the reactive trigger settles
//! after at most one idle pass.

use crate::db::DispatchStore;
use crate::error::Result;
use crate::models::{Ride, RideStatus};
use crate::services::dispatch::Dispatcher;
use crate::services::feed::ride_snapshots;
use crate::services::monitor::ActivityMonitor;
use futures_util::stream::{select_all, SelectAll};
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// One event's ride snapshots, tagged with the event id.
type EventFeed = Pin<Box<dyn Stream<Item = (String, Result<Vec<Ride>>)> + Send>>;

pub struct Scheduler {
    feeds: SelectAll<EventFeed>,
    passes: Passes,
}

/// The work both triggers run. Kept apart from the feeds, which are polled
/// by the loop alone.
struct Passes {
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<ActivityMonitor>,
    event_ids: Vec<String>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        dispatcher: Arc<Dispatcher>,
        monitor: Arc<ActivityMonitor>,
        event_ids: Vec<String>,
        interval: Duration,
    ) -> Self {
        // Subscribe now so changes made before the loop starts still wake it.
        let feeds = select_all(event_ids.iter().map(|event_id| {
            let tag = event_id.clone();
            Box::pin(
                ride_snapshots(store.clone(), event_id)
                    .map(move |snapshot| (tag.clone(), snapshot)),
            ) as EventFeed
        }));
        Self {
            feeds,
            passes: Passes {
                dispatcher,
                monitor,
                event_ids,
                interval,
            },
        }
    }

    /// Run until every event's change feed closes.
    pub async fn run(self) {
        let Self { mut feeds, passes } = self;
        let mut ticker = tokio::time::interval(passes.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            events = ?passes.event_ids,
            interval_secs = passes.interval.as_secs(),
            "Dispatch scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => passes.tick().await,
                snapshot = feeds.next() => match snapshot {
                    Some((event_id, Ok(rides))) => passes.on_snapshot(&event_id, &rides).await,
                    Some((event_id, Err(e))) => {
                        tracing::warn!(event_id = %event_id, error = %e, "Ride snapshot failed");
                    }
                    None => {
                        tracing::warn!("Store change feed closed; scheduler stopping");
                        break;
                    }
                },
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

impl Passes {
    /// Full periodic pass over every live event. Failures are logged per
    /// event and never stop the loop.
    async fn tick(&self) {
        for event_id in &self.event_ids {
            if let Err(e) = self.dispatcher.run_cycle(event_id).await {
                tracing::error!(event_id = %event_id, error = %e, "Dispatch cycle failed");
            }
            if let Err(e) = self.monitor.sweep(event_id).await {
                tracing::error!(event_id = %event_id, error = %e, "Monitor sweep failed");
            }
        }
    }

    /// Dispatch-only pass for one event, run when its ride snapshot changes.
    async fn on_snapshot(&self, event_id: &str, rides: &[Ride]) {
        if !rides.iter().any(|r| r.status == RideStatus::Queued) {
            return;
        }
        match self.dispatcher.dispatch_all(event_id).await {
            Ok((assignments, _)) if !assignments.is_empty() => {
                tracing::debug!(event_id, assigned = assignments.len(), "Reactive dispatch");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(event_id, error = %e, "Reactive dispatch failed");
            }
        }
    }
}

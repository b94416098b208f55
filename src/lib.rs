// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! DD Dispatch: ride queueing and driver dispatch for chapter events
//!
//! This crate provides the engine that ranks ride requests, assigns them
//! to designated drivers, and watches driver availability, plus the HTTP
//! API that riders, drivers, and admins use to reach it.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::DispatchStore;
use services::{ActivityMonitor, Dispatcher, RideService, RosterService, Scheduler};
use std::sync::Arc;
use time_utils::Clock;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn DispatchStore>,
    pub roster: Arc<dyn RosterService>,
    pub clock: Arc<dyn Clock>,
    pub dispatcher: Arc<Dispatcher>,
    pub monitor: Arc<ActivityMonitor>,
    pub rides: RideService,
}

impl AppState {
    /// Wire the services around one store, roster, and clock.
    pub fn new(
        config: Config,
        store: Arc<dyn DispatchStore>,
        roster: Arc<dyn RosterService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            clock.clone(),
            &config.dispatch,
        ));
        let monitor = Arc::new(ActivityMonitor::new(
            store.clone(),
            clock.clone(),
            &config.dispatch,
        ));
        let rides = RideService::new(
            store.clone(),
            roster.clone(),
            clock.clone(),
            monitor.clone(),
            &config.dispatch,
        );

        Self {
            config,
            store,
            roster,
            clock,
            dispatcher,
            monitor,
            rides,
        }
    }

    /// Background loop for the configured live events, if there are any.
    pub fn scheduler(&self) -> Option<Scheduler> {
        if self.config.live_event_ids.is_empty() {
            return None;
        }
        Some(Scheduler::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.monitor.clone(),
            self.config.live_event_ids.clone(),
            self.config.dispatch.recalc_interval(),
        ))
    }
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - dispatch engine and business logic.

pub mod dispatch;
pub mod feed;
pub mod load;
pub mod monitor;
pub mod priority;
pub mod queue;
pub mod retry;
pub mod rides;
pub mod roster;
pub mod scheduler;

pub use dispatch::{CycleReport, DispatchOutcome, Dispatcher, DriverLoad};
pub use load::DriverLoadEstimator;
pub use monitor::{ActivityMonitor, SweepReport, ToggleOutcome};
pub use priority::PriorityCalculator;
pub use queue::{QueueRanker, RankedRide};
pub use rides::{QueueEntry, RideService, RideView};
pub use roster::{RosterService, StaticRoster};
pub use scheduler::Scheduler;

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod alert;
pub mod driver;
pub mod ride;
pub mod roster;

pub use alert::{AdminAlert, AlertKind};
pub use driver::{DriverAssignment, DriverMutation};
pub use ride::{Ride, RideStatus, RideTransition};
pub use roster::{EventRecord, RosterEntry};

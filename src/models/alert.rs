// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Operator alerts raised by the monitor and the ride intake.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ToggleAbuse,
    ProlongedInactivity,
    EmergencyRequest,
}

/// Stored alert record. Only `read` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminAlert {
    pub id: String,
    pub event_id: String,
    pub kind: AlertKind,
    #[serde(default)]
    pub driver_id: Option<String>,
    #[serde(default)]
    pub ride_id: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl AdminAlert {
    pub fn new(event_id: &str, kind: AlertKind, message: String, at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            kind,
            driver_id: None,
            ride_id: None,
            message,
            created_at: at,
            read: false,
        }
    }

    pub fn for_driver(mut self, driver_id: &str) -> Self {
        self.driver_id = Some(driver_id.to_string());
        self
    }

    pub fn for_ride(mut self, ride_id: &str) -> Self {
        self.ride_id = Some(ride_id.to_string());
        self
    }

    /// Replace the random id with one derived from the triggering occurrence,
    /// so the same occurrence always maps to the same document.
    pub fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }
}

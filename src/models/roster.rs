// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Read-only identity records owned by the roster service.

use serde::{Deserialize, Serialize};

/// Member record (Firestore `users` collection, keyed by user ID).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub user_id: String,
    pub display_name: String,
    /// Class rank as stored upstream; validated before it reaches priority math
    pub class_rank: i32,
    /// Chapter the member belongs to
    pub group_id: String,
}

/// Event record (Firestore `events` collection), only the fields dispatch needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    /// Hosting chapter
    pub group_id: String,
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity/roster lookups.
//!
//! The roster is owned elsewhere; dispatch only reads class rank and chapter
//! membership from it.

use crate::error::Result;
use crate::models::{EventRecord, RosterEntry};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Errors loading a roster file.
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// On-disk roster layout.
#[derive(Debug, Default, Deserialize)]
struct RosterFile {
    #[serde(default)]
    members: Vec<RosterEntry>,
    #[serde(default)]
    events: Vec<EventRecord>,
}

/// Read-only view of members and events.
#[async_trait]
pub trait RosterService: Send + Sync {
    async fn lookup_member(&self, user_id: &str) -> Result<Option<RosterEntry>>;

    /// Chapter hosting the event.
    async fn event_group(&self, event_id: &str) -> Result<Option<String>>;
}

/// Roster held in memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct StaticRoster {
    members: DashMap<String, RosterEntry>,
    events: DashMap<String, String>,
}

impl StaticRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load members and events from a JSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, RosterError> {
        let json_data =
            fs::read_to_string(path.as_ref()).map_err(|e| RosterError::IoError(e.to_string()))?;
        Self::load_from_json(&json_data)
    }

    /// Load from `{"members": [...], "events": [...]}`.
    pub fn load_from_json(json_data: &str) -> std::result::Result<Self, RosterError> {
        let file: RosterFile =
            serde_json::from_str(json_data).map_err(|e| RosterError::ParseError(e.to_string()))?;

        let roster = Self::new();
        for member in file.members {
            roster.members.insert(member.user_id.clone(), member);
        }
        for event in file.events {
            roster.events.insert(event.event_id, event.group_id);
        }
        Ok(roster)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn add_member(&self, user_id: &str, display_name: &str, class_rank: i32, group_id: &str) {
        self.members.insert(
            user_id.to_string(),
            RosterEntry {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                class_rank,
                group_id: group_id.to_string(),
            },
        );
    }

    pub fn add_event(&self, event_id: &str, group_id: &str) {
        self.events
            .insert(event_id.to_string(), group_id.to_string());
    }
}

#[async_trait]
impl RosterService for StaticRoster {
    async fn lookup_member(&self, user_id: &str) -> Result<Option<RosterEntry>> {
        Ok(self.members.get(user_id).map(|entry| entry.clone()))
    }

    async fn event_group(&self, event_id: &str) -> Result<Option<String>> {
        Ok(self.events.get(event_id).map(|group| group.clone()))
    }
}

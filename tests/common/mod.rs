// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{DateTime, TimeZone, Utc};
use dd_dispatch::config::Config;
use dd_dispatch::db::{FirestoreDb, MemoryDb};
use dd_dispatch::middleware::auth::{create_jwt, Role};
use dd_dispatch::routes::create_router;
use dd_dispatch::services::StaticRoster;
use dd_dispatch::time_utils::ManualClock;
use dd_dispatch::AppState;
use std::sync::Arc;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project", 500)
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Start of the test evening.
#[allow(dead_code)]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 21, 0, 0).unwrap()
}

/// In-memory app plus handles on its store, roster, and clock.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryDb>,
    pub roster: Arc<StaticRoster>,
    pub clock: Arc<ManualClock>,
}

/// Event `formal` hosted by chapter `alpha`, with one rider per class
/// plus a guest from chapter `beta`.
#[allow(dead_code)]
pub fn seeded_roster() -> StaticRoster {
    let roster = StaticRoster::new();
    roster.add_event("formal", "alpha");
    roster.add_member("senior", "Sam Senior", 4, "alpha");
    roster.add_member("junior", "Jo Junior", 3, "alpha");
    roster.add_member("sophomore", "Sol Sophomore", 2, "alpha");
    roster.add_member("freshman", "Fran Freshman", 1, "alpha");
    roster.add_member("guest", "Gus Guest", 4, "beta");
    roster
}

/// Create a test app backed by the in-memory store and a manual clock.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    let mut config = Config::test_default();
    config.dispatch.retry_base_delay_ms = 1;

    let store = Arc::new(MemoryDb::default());
    let roster = Arc::new(seeded_roster());
    let clock = Arc::new(ManualClock::new(t0()));

    let state = Arc::new(AppState::new(
        config,
        store.clone(),
        roster.clone(),
        clock.clone(),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        roster,
        clock,
    }
}

/// Create a test JWT for a user with the given role.
#[allow(dead_code)]
pub fn create_test_jwt(user_id: &str, role: Role, signing_key: &[u8]) -> String {
    create_jwt(user_id, role, signing_key).expect("Failed to create JWT")
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper implementing the dispatch store.
//!
//! Provides typed operations for:
//! - Rides (requests and their lifecycle)
//! - Driver assignments (per-event enrollment and activity)
//! - Admin alerts
//! - Roster lookups (`users`, `events`, read-only)
//!
//! Every mutation is a read-modify-write inside a Firestore transaction, so a
//! concurrent writer touching the same document makes the commit fail and the
//! caller re-reads instead of overwriting. Alerts are staged into the
//! transaction of the write that raises them.
//!
//! A rider's unfinished ride is pinned by an `open_rides/{event}_{rider}`
//! document, created with the ride and deleted when the ride finishes. Ride
//! intake reads it inside the transaction, so two concurrent requests from
//! one rider conflict instead of both landing.

use crate::config::STORE_MAX_BATCH_SIZE;
use crate::db::{
    check_driver_preconditions, check_ride_preconditions, collections, AlertRule, BatchOp,
    DispatchStore, Precondition, RideFilter,
};
use crate::error::{AppError, Result};
use crate::models::{
    AdminAlert, DriverAssignment, DriverMutation, EventRecord, Ride, RideStatus, RideTransition,
    RosterEntry,
};
use crate::services::roster::RosterService;
use async_trait::async_trait;
use firestore::{FirestoreConsistencySelector, FirestoreQueryDirection, FirestoreTransaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Marker document held while a rider has an unfinished ride in an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenRideGuard {
    ride_id: String,
}

fn open_ride_key(event_id: &str, rider_id: &str) -> String {
    format!("{}_{}", event_id, rider_id)
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
    /// Ticks on writes made through this client.
    revision: Arc<watch::Sender<u64>>,
    max_batch_size: usize,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str, max_batch_size: usize) -> Result<Self> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id, max_batch_size).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self::with_client(Some(client), max_batch_size))
    }

    fn with_client(client: Option<firestore::FirestoreDb>, max_batch_size: usize) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            client,
            revision: Arc::new(revision),
            max_batch_size: max_batch_size.clamp(1, STORE_MAX_BATCH_SIZE),
        }
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str, max_batch_size: usize) -> Result<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self::with_client(Some(client), max_batch_size))
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self::with_client(None, STORE_MAX_BATCH_SIZE)
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Client whose reads join `transaction` for conflict detection.
    fn transactional_reader(
        client: &firestore::FirestoreDb,
        transaction: &FirestoreTransaction<'_>,
    ) -> firestore::FirestoreDb {
        client.clone_with_consistency_selector(FirestoreConsistencySelector::Transaction(
            transaction.transaction_id().clone(),
        ))
    }

    async fn commit(&self, transaction: FirestoreTransaction<'_>) -> Result<()> {
        transaction
            .commit()
            .await
            .map_err(|e| AppError::Transient(format!("Transaction commit failed: {}", e)))?;
        Ok(())
    }

    // ─── Staged (in-transaction) operations ──────────────────────

    async fn stage_ride_insert(
        client: &firestore::FirestoreDb,
        transaction: &mut FirestoreTransaction<'_>,
        ride: &Ride,
        alert: Option<&AdminAlert>,
    ) -> Result<()> {
        let reader = Self::transactional_reader(client, transaction);
        let guard_id = open_ride_key(&ride.event_id, &ride.rider_id);

        let guard: Option<OpenRideGuard> = reader
            .fluent()
            .select()
            .by_id_in(collections::OPEN_RIDES)
            .obj()
            .one(&guard_id)
            .await
            .map_err(|e| map_db_error("read open ride guard", e))?;
        if let Some(guard) = guard {
            let open: Option<Ride> = reader
                .fluent()
                .select()
                .by_id_in(collections::RIDES)
                .obj()
                .one(&guard.ride_id)
                .await
                .map_err(|e| map_db_error("read open ride", e))?;
            // A guard whose ride already finished is stale and gets replaced.
            if let Some(open) = open.filter(|r| r.status.is_active()) {
                return Err(AppError::InvalidInput(format!(
                    "rider already has ride {} ({})",
                    open.id, open.status
                )));
            }
        }

        let existing: Option<Ride> = reader
            .fluent()
            .select()
            .by_id_in(collections::RIDES)
            .obj()
            .one(&ride.id)
            .await
            .map_err(|e| map_db_error("read ride in transaction", e))?;
        if existing.is_some() {
            return Err(AppError::PreconditionFailed(format!(
                "ride {} already exists",
                ride.id
            )));
        }

        client
            .fluent()
            .update()
            .in_col(collections::RIDES)
            .document_id(&ride.id)
            .object(ride)
            .add_to_transaction(transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add ride to transaction: {}", e))
            })?;
        client
            .fluent()
            .update()
            .in_col(collections::OPEN_RIDES)
            .document_id(&guard_id)
            .object(&OpenRideGuard {
                ride_id: ride.id.clone(),
            })
            .add_to_transaction(transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add ride guard to transaction: {}", e))
            })?;
        if let Some(alert) = alert {
            Self::stage_alert(client, transaction, alert)?;
        }
        Ok(())
    }

    fn stage_alert(
        client: &firestore::FirestoreDb,
        transaction: &mut FirestoreTransaction<'_>,
        alert: &AdminAlert,
    ) -> Result<()> {
        client
            .fluent()
            .update()
            .in_col(collections::ADMIN_ALERTS)
            .document_id(&alert.id)
            .object(alert)
            .add_to_transaction(transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add alert to transaction: {}", e))
            })?;
        Ok(())
    }

    async fn stage_ride_update(
        client: &firestore::FirestoreDb,
        transaction: &mut FirestoreTransaction<'_>,
        ride_id: &str,
        preconditions: &[Precondition],
        transition: &RideTransition,
    ) -> Result<Ride> {
        let reader = Self::transactional_reader(client, transaction);

        let mut ride: Ride = reader
            .fluent()
            .select()
            .by_id_in(collections::RIDES)
            .obj()
            .one(ride_id)
            .await
            .map_err(|e| map_db_error("read ride in transaction", e))?
            .ok_or_else(|| AppError::NotFound(format!("ride {}", ride_id)))?;

        let mut driver: Option<DriverAssignment> = None;
        let needs_driver = Precondition::driver_dependency(preconditions)
            .map(String::from)
            .or_else(|| match transition {
                RideTransition::Complete { .. } => ride.assigned_driver_id.clone(),
                _ => None,
            });
        if let Some(driver_id) = needs_driver {
            driver = reader
                .fluent()
                .select()
                .by_id_in(collections::DRIVER_ASSIGNMENTS)
                .obj()
                .one(&DriverAssignment::doc_id(&ride.event_id, &driver_id))
                .await
                .map_err(|e| map_db_error("read driver in transaction", e))?;
        }

        check_ride_preconditions(&ride, driver.as_ref(), preconditions)?;
        ride.apply(transition)?;

        let guard_id = open_ride_key(&ride.event_id, &ride.rider_id);
        let release_guard = if ride.status.is_terminal() {
            let guard: Option<OpenRideGuard> = reader
                .fluent()
                .select()
                .by_id_in(collections::OPEN_RIDES)
                .obj()
                .one(&guard_id)
                .await
                .map_err(|e| map_db_error("read open ride guard", e))?;
            guard.is_some_and(|g| g.ride_id == ride.id)
        } else {
            false
        };

        client
            .fluent()
            .update()
            .in_col(collections::RIDES)
            .document_id(&ride.id)
            .object(&ride)
            .add_to_transaction(transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add ride to transaction: {}", e))
            })?;

        if release_guard {
            client
                .fluent()
                .delete()
                .from(collections::OPEN_RIDES)
                .document_id(&guard_id)
                .add_to_transaction(transaction)
                .map_err(|e| {
                    AppError::Database(format!(
                        "Failed to add guard release to transaction: {}",
                        e
                    ))
                })?;
        }

        if matches!(transition, RideTransition::Complete { .. }) {
            if let Some(mut assignment) = driver {
                assignment.apply(&DriverMutation::RecordCompletedRide);
                client
                    .fluent()
                    .update()
                    .in_col(collections::DRIVER_ASSIGNMENTS)
                    .document_id(DriverAssignment::doc_id(
                        &assignment.event_id,
                        &assignment.driver_id,
                    ))
                    .object(&assignment)
                    .add_to_transaction(transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add driver counter to transaction: {}",
                            e
                        ))
                    })?;
            }
        }

        Ok(ride)
    }

    async fn stage_driver_update(
        client: &firestore::FirestoreDb,
        transaction: &mut FirestoreTransaction<'_>,
        event_id: &str,
        driver_id: &str,
        preconditions: &[Precondition],
        mutation: &DriverMutation,
    ) -> Result<DriverAssignment> {
        let reader = Self::transactional_reader(client, transaction);
        let doc_id = DriverAssignment::doc_id(event_id, driver_id);

        let mut assignment: DriverAssignment = reader
            .fluent()
            .select()
            .by_id_in(collections::DRIVER_ASSIGNMENTS)
            .obj()
            .one(&doc_id)
            .await
            .map_err(|e| map_db_error("read driver in transaction", e))?
            .ok_or_else(|| {
                AppError::NotFound(format!("driver {} in event {}", driver_id, event_id))
            })?;

        check_driver_preconditions(&assignment, preconditions)?;
        assignment.apply(mutation);

        client
            .fluent()
            .update()
            .in_col(collections::DRIVER_ASSIGNMENTS)
            .document_id(&doc_id)
            .object(&assignment)
            .add_to_transaction(transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add driver to transaction: {}", e))
            })?;

        Ok(assignment)
    }
}

/// Classify a Firestore error: retryable failures become `Transient`.
fn map_db_error(context: &str, err: firestore::errors::FirestoreError) -> AppError {
    use firestore::errors::FirestoreError;
    match &err {
        FirestoreError::DatabaseError(db_err) if db_err.retry_possible => {
            AppError::Transient(format!("{}: {}", context, err))
        }
        FirestoreError::NetworkError(_) => AppError::Transient(format!("{}: {}", context, err)),
        _ => AppError::Database(format!("{}: {}", context, err)),
    }
}

#[async_trait]
impl DispatchStore for FirestoreDb {
    // ─── Ride Operations ─────────────────────────────────────────

    async fn get_ride(&self, ride_id: &str) -> Result<Option<Ride>> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::RIDES)
            .obj()
            .one(ride_id)
            .await
            .map_err(|e| map_db_error("get ride", e))
    }

    /// Reads the whole event in pages of `max_batch_size`; the result is only
    /// returned once every page has been read.
    async fn query_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>> {
        let client = self.get_client()?;
        let page_size = self.max_batch_size as u32;
        let mut rides = Vec::new();
        let mut offset = 0u32;

        loop {
            let event_id = filter.event_id.clone();
            let page: Vec<Ride> = client
                .fluent()
                .select()
                .from(collections::RIDES)
                .filter(move |q| q.for_all([q.field("event_id").eq(event_id.clone())]))
                .order_by([("requested_at", FirestoreQueryDirection::Ascending)])
                .limit(page_size)
                .offset(offset)
                .obj()
                .query()
                .await
                .map_err(|e| map_db_error("query rides", e))?;

            let fetched = page.len();
            rides.extend(page.into_iter().filter(|ride| filter.matches(ride)));
            if fetched < page_size as usize {
                break;
            }
            offset += page_size;
        }

        rides.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rides)
    }

    async fn insert_ride(&self, ride: &Ride, alert: Option<&AdminAlert>) -> Result<()> {
        let client = self.get_client()?;
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| map_db_error("begin transaction", e))?;

        match Self::stage_ride_insert(client, &mut transaction, ride, alert).await {
            Ok(()) => {
                self.commit(transaction).await?;
                self.bump_revision();
                tracing::debug!(ride_id = %ride.id, alert = alert.is_some(), "Ride inserted");
                Ok(())
            }
            Err(e) => {
                let _ = transaction.rollback().await;
                Err(e)
            }
        }
    }

    async fn update_ride(
        &self,
        ride_id: &str,
        preconditions: &[Precondition],
        transition: &RideTransition,
    ) -> Result<Ride> {
        let client = self.get_client()?;
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| map_db_error("begin transaction", e))?;

        match Self::stage_ride_update(client, &mut transaction, ride_id, preconditions, transition)
            .await
        {
            Ok(ride) => {
                self.commit(transaction).await?;
                self.bump_revision();
                tracing::debug!(ride_id, status = %ride.status, "Ride updated atomically");
                Ok(ride)
            }
            Err(e) => {
                let _ = transaction.rollback().await;
                Err(e)
            }
        }
    }

    async fn batch_write(&self, ops: &[BatchOp]) -> Result<usize> {
        let client = self.get_client()?;
        let mut applied = 0;

        for chunk in ops.chunks(self.max_batch_size) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| map_db_error("begin transaction", e))?;

            let mut chunk_applied = 0;
            for op in chunk {
                let staged = match op {
                    BatchOp::SetRidePriority { ride_id, priority } => Self::stage_ride_update(
                        client,
                        &mut transaction,
                        ride_id,
                        &[Precondition::RideStatusIn(RideStatus::RANKABLE.to_vec())],
                        &RideTransition::Reprioritize {
                            priority: *priority,
                        },
                    )
                    .await
                    .map(|_| ()),
                    BatchOp::ResetToggleWindow {
                        event_id,
                        driver_id,
                        at,
                        window,
                    } => Self::stage_driver_update(
                        client,
                        &mut transaction,
                        event_id,
                        driver_id,
                        &[],
                        &DriverMutation::ResetToggleWindow {
                            at: *at,
                            window: *window,
                        },
                    )
                    .await
                    .map(|_| ()),
                };

                match staged {
                    Ok(()) => chunk_applied += 1,
                    Err(e) if e.is_stale_view() => {
                        tracing::debug!(op = ?op, error = %e, "Skipping stale batch op");
                    }
                    Err(e) => {
                        let _ = transaction.rollback().await;
                        return Err(e);
                    }
                }
            }

            if chunk_applied == 0 {
                let _ = transaction.rollback().await;
                continue;
            }

            self.commit(transaction).await?;
            applied += chunk_applied;
            self.bump_revision();
        }

        tracing::debug!(applied, total = ops.len(), "Batch write complete");
        Ok(applied)
    }

    // ─── Driver Assignment Operations ────────────────────────────

    async fn get_driver(
        &self,
        event_id: &str,
        driver_id: &str,
    ) -> Result<Option<DriverAssignment>> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::DRIVER_ASSIGNMENTS)
            .obj()
            .one(&DriverAssignment::doc_id(event_id, driver_id))
            .await
            .map_err(|e| map_db_error("get driver", e))
    }

    async fn query_drivers(&self, event_id: &str) -> Result<Vec<DriverAssignment>> {
        let event_id = event_id.to_string();
        let mut drivers: Vec<DriverAssignment> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::DRIVER_ASSIGNMENTS)
            .filter(move |q| q.for_all([q.field("event_id").eq(event_id.clone())]))
            .obj()
            .query()
            .await
            .map_err(|e| map_db_error("query drivers", e))?;
        drivers.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
        Ok(drivers)
    }

    async fn enroll_driver(&self, assignment: &DriverAssignment) -> Result<DriverAssignment> {
        let client = self.get_client()?;
        let doc_id = DriverAssignment::doc_id(&assignment.event_id, &assignment.driver_id);

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| map_db_error("begin transaction", e))?;
        let reader = Self::transactional_reader(client, &transaction);

        let existing: Option<DriverAssignment> = match reader
            .fluent()
            .select()
            .by_id_in(collections::DRIVER_ASSIGNMENTS)
            .obj()
            .one(&doc_id)
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                let _ = transaction.rollback().await;
                return Err(map_db_error("read driver in transaction", e));
            }
        };

        if let Some(existing) = existing {
            let _ = transaction.rollback().await;
            return Ok(existing);
        }

        if let Err(e) = client
            .fluent()
            .update()
            .in_col(collections::DRIVER_ASSIGNMENTS)
            .document_id(&doc_id)
            .object(assignment)
            .add_to_transaction(&mut transaction)
        {
            let _ = transaction.rollback().await;
            return Err(AppError::Database(format!(
                "Failed to add enrollment to transaction: {}",
                e
            )));
        }

        self.commit(transaction).await?;
        self.bump_revision();
        Ok(assignment.clone())
    }

    async fn update_driver_with_alert(
        &self,
        event_id: &str,
        driver_id: &str,
        preconditions: &[Precondition],
        mutation: &DriverMutation,
        alert_for: AlertRule<'_>,
    ) -> Result<(DriverAssignment, Option<AdminAlert>)> {
        let client = self.get_client()?;
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| map_db_error("begin transaction", e))?;

        let staged = async {
            let assignment = Self::stage_driver_update(
                client,
                &mut transaction,
                event_id,
                driver_id,
                preconditions,
                mutation,
            )
            .await?;
            let alert = alert_for(&assignment);
            if let Some(alert) = &alert {
                Self::stage_alert(client, &mut transaction, alert)?;
            }
            Ok::<_, AppError>((assignment, alert))
        }
        .await;

        match staged {
            Ok(written) => {
                self.commit(transaction).await?;
                self.bump_revision();
                Ok(written)
            }
            Err(e) => {
                let _ = transaction.rollback().await;
                Err(e)
            }
        }
    }

    // ─── Alert Operations ────────────────────────────────────────

    async fn query_alerts(&self, event_id: &str, unread_only: bool) -> Result<Vec<AdminAlert>> {
        let event_id = event_id.to_string();
        let alerts: Vec<AdminAlert> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::ADMIN_ALERTS)
            .filter(move |q| q.for_all([q.field("event_id").eq(event_id.clone())]))
            .order_by([("created_at", FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(|e| map_db_error("query alerts", e))?;

        Ok(alerts
            .into_iter()
            .filter(|alert| !unread_only || !alert.read)
            .collect())
    }

    async fn mark_alert_read(&self, alert_id: &str) -> Result<AdminAlert> {
        let client = self.get_client()?;
        let mut alert: AdminAlert = client
            .fluent()
            .select()
            .by_id_in(collections::ADMIN_ALERTS)
            .obj()
            .one(alert_id)
            .await
            .map_err(|e| map_db_error("get alert", e))?
            .ok_or_else(|| AppError::NotFound(format!("alert {}", alert_id)))?;

        // Only the read flag ever changes, so a plain overwrite cannot lose data.
        alert.read = true;
        let _: () = client
            .fluent()
            .update()
            .in_col(collections::ADMIN_ALERTS)
            .document_id(alert_id)
            .object(&alert)
            .execute()
            .await
            .map_err(|e| map_db_error("mark alert read", e))?;
        Ok(alert)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

#[async_trait]
impl RosterService for FirestoreDb {
    async fn lookup_member(&self, user_id: &str) -> Result<Option<RosterEntry>> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| map_db_error("lookup member", e))
    }

    async fn event_group(&self, event_id: &str) -> Result<Option<String>> {
        let event: Option<EventRecord> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::EVENTS)
            .obj()
            .one(event_id)
            .await
            .map_err(|e| map_db_error("lookup event", e))?;
        Ok(event.map(|e| e.group_id))
    }
}

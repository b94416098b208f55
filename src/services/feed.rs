// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Change feed over an event's waiting rides. Drives the scheduler's
//! reactive dispatch.

use crate::db::{DispatchStore, RideFilter};
use crate::error::Result;
use crate::models::{Ride, RideStatus};
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;

/// Snapshots of the event's rankable rides: one immediately, then one after
/// every store revision.
///
/// Each item is a fresh full read, never a patch of the previous one, so a
/// consumer that falls behind just sees the latest state. Revisions that
/// arrive while a read is in flight are coalesced. Dropping the stream
/// unsubscribes; calling again starts over.
pub fn ride_snapshots(
    store: Arc<dyn DispatchStore>,
    event_id: &str,
) -> impl Stream<Item = Result<Vec<Ride>>> + Send + 'static {
    let filter = RideFilter::for_event(event_id).with_statuses(&RideStatus::RANKABLE);
    WatchStream::new(store.subscribe()).then(move |_revision| {
        let store = store.clone();
        let filter = filter.clone();
        async move { store.query_rides(&filter).await }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;
    use crate::models::RideTransition;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn ride(id: &str) -> Ride {
        Ride {
            id: id.to_string(),
            rider_id: format!("rider-{}", id),
            event_id: "formal".to_string(),
            group_id: "alpha".to_string(),
            rider_class_rank: 2,
            same_group: true,
            assigned_driver_id: None,
            status: RideStatus::Queued,
            priority: 20.0,
            is_emergency: false,
            emergency_reason: None,
            requested_at: Utc.with_ymd_and_hms(2026, 3, 1, 22, 0, 0).unwrap(),
            assigned_at: None,
            enroute_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    async fn next_snapshot<S>(stream: &mut S) -> Vec<String>
    where
        S: Stream<Item = Result<Vec<Ride>>> + Unpin,
    {
        let rides = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("feed stalled")
            .expect("feed ended")
            .unwrap();
        rides.into_iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn test_emits_current_then_changes() {
        let store = Arc::new(MemoryDb::default());
        store.insert_ride(&ride("r1"), None).await.unwrap();

        let mut feed = Box::pin(ride_snapshots(store.clone(), "formal"));
        assert_eq!(next_snapshot(&mut feed).await, vec!["r1"]);

        store.insert_ride(&ride("r2"), None).await.unwrap();
        assert_eq!(next_snapshot(&mut feed).await, vec!["r1", "r2"]);

        store
            .update_ride(
                "r1",
                &[],
                &RideTransition::Cancel {
                    at: Utc.with_ymd_and_hms(2026, 3, 1, 22, 5, 0).unwrap(),
                },
            )
            .await
            .unwrap();
        assert_eq!(next_snapshot(&mut feed).await, vec!["r2"]);
    }

    #[tokio::test]
    async fn test_new_subscription_starts_from_latest() {
        let store = Arc::new(MemoryDb::default());
        store.insert_ride(&ride("r1"), None).await.unwrap();
        drop(ride_snapshots(store.clone(), "formal"));

        store.insert_ride(&ride("r2"), None).await.unwrap();
        let mut feed = Box::pin(ride_snapshots(store.clone(), "formal"));
        assert_eq!(next_snapshot(&mut feed).await, vec!["r1", "r2"]);
    }
}

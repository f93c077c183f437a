//! Claim ownership and stale-claim recovery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{minutes, pending_event, t0};
use uuid::Uuid;
use workflow_events::engine::Claimer;
use workflow_events::error::Error;
use workflow_events::model::{EventKind, SchedulingState};
use workflow_events::store::EventStore;
use workflow_events::store::memory::MemoryStore;

const HOUR: Duration = Duration::from_secs(60 * 60);

fn seeded(kind: EventKind, n: usize) -> (Arc<MemoryStore>, Vec<Uuid>) {
    let store = Arc::new(MemoryStore::new());
    let workflow_id = Uuid::new_v4();
    let ids = (0..n)
        .map(|_| {
            let event = pending_event(workflow_id, kind, Some(t0()));
            let id = event.id;
            store.put_event(event);
            id
        })
        .collect();
    (store, ids)
}

#[tokio::test]
async fn due_events_are_claimed_once() {
    let (store, ids) = seeded(EventKind::Delay, 3);
    let claimer = Claimer::new(store.clone(), HOUR);

    let first = claimer.claim(EventKind::Delay, t0()).await.unwrap();
    assert_eq!(first.events.len(), 3);
    assert!(first.events.iter().all(|e| e.lock_id == Some(first.token)));
    assert!(first.events.iter().all(|e| ids.contains(&e.id)));

    let second = claimer.claim(EventKind::Delay, t0() + minutes(1)).await.unwrap();
    assert!(second.events.is_empty());
    assert_ne!(first.token, second.token);
}

#[tokio::test]
async fn future_and_finished_events_are_not_claimed() {
    let store = Arc::new(MemoryStore::new());
    let workflow_id = Uuid::new_v4();
    store.put_event(pending_event(workflow_id, EventKind::Delay, Some(t0() + minutes(10))));
    store.put_event(pending_event(workflow_id, EventKind::Delay, None));
    let mut finished = pending_event(workflow_id, EventKind::Delay, Some(t0()));
    finished.done = true;
    store.put_event(finished);

    let claim = Claimer::new(store, HOUR)
        .claim(EventKind::Delay, t0())
        .await
        .unwrap();

    assert!(claim.events.is_empty());
}

#[tokio::test]
async fn claims_are_filtered_by_kind() {
    let store = Arc::new(MemoryStore::new());
    let workflow_id = Uuid::new_v4();
    store.put_event(pending_event(workflow_id, EventKind::Delay, Some(t0())));
    store.put_event(pending_event(workflow_id, EventKind::Notification, Some(t0())));
    let claimer = Claimer::new(store, HOUR);

    let delays = claimer.claim(EventKind::Delay, t0()).await.unwrap();
    let notifications = claimer.claim(EventKind::Notification, t0()).await.unwrap();

    assert_eq!(delays.events.len(), 1);
    assert_eq!(delays.events[0].kind, EventKind::Delay);
    assert_eq!(notifications.events.len(), 1);
    assert_eq!(notifications.events[0].kind, EventKind::Notification);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_are_disjoint() {
    let (store, ids) = seeded(EventKind::Delay, 40);
    let claimer = Arc::new(Claimer::new(store, HOUR));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let claimer = Arc::clone(&claimer);
            tokio::spawn(async move { claimer.claim(EventKind::Delay, t0()).await })
        })
        .collect();

    let mut claimed = Vec::new();
    for handle in handles {
        let claim = handle.await.unwrap().unwrap();
        claimed.extend(claim.events.into_iter().map(|e| e.id));
    }

    claimed.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(claimed, expected);
}

#[tokio::test]
async fn reaper_waits_for_the_stale_threshold() {
    let (store, ids) = seeded(EventKind::Notification, 1);
    let claimer = Claimer::new(store.clone(), HOUR);
    let claim = claimer.claim(EventKind::Notification, t0()).await.unwrap();
    assert_eq!(claim.events.len(), 1);

    assert_eq!(claimer.reap(t0() + minutes(30)).await.unwrap(), 0);
    assert_eq!(claimer.reap(t0() + minutes(60)).await.unwrap(), 0);
    assert_eq!(claimer.reap(t0() + minutes(61)).await.unwrap(), 1);

    let released = store.get_event(ids[0]).await.unwrap();
    assert!(released.lock_id.is_none());
    assert!(released.locked_at.is_none());

    let reclaimed = claimer
        .claim(EventKind::Notification, t0() + minutes(61))
        .await
        .unwrap();
    assert_eq!(reclaimed.events.len(), 1);
}

#[tokio::test]
async fn reaped_claim_cannot_be_completed() {
    let (store, ids) = seeded(EventKind::Delay, 1);
    let claimer = Claimer::new(store.clone(), HOUR);
    let stale = claimer.claim(EventKind::Delay, t0()).await.unwrap();

    claimer.reap(t0() + minutes(90)).await.unwrap();
    let fresh = claimer.claim(EventKind::Delay, t0() + minutes(90)).await.unwrap();

    let err = store
        .complete_claimed(ids[0], stale.token, &SchedulingState::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ClaimLost(id) if id == ids[0]));

    store
        .complete_claimed(ids[0], fresh.token, &SchedulingState::default())
        .await
        .unwrap();
    assert!(store.get_event(ids[0]).await.unwrap().done);
}

#[tokio::test]
async fn reschedule_releases_the_claim() {
    let (store, ids) = seeded(EventKind::Notification, 1);
    let claimer = Claimer::new(store.clone(), HOUR);
    let claim = claimer.claim(EventKind::Notification, t0()).await.unwrap();

    store
        .reschedule_claimed(
            ids[0],
            claim.token,
            &SchedulingState::default(),
            Some(t0() + minutes(5)),
        )
        .await
        .unwrap();

    let event = store.get_event(ids[0]).await.unwrap();
    assert!(event.lock_id.is_none());
    assert_eq!(event.due_date, Some(t0() + minutes(5)));
    assert_eq!(event.version, 2);

    let early = claimer.claim(EventKind::Notification, t0() + minutes(4)).await.unwrap();
    assert!(early.events.is_empty());
}

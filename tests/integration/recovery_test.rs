//! Integration tests for recovering attempts left ongoing

use crate::harness::{at, saved_sprint, start_request, FlakyStore, Harness};
use hawkspeed::racing::{RaceAttempt, RaceResult, RaceState};
use hawkspeed::session::SessionRegistry;
use hawkspeed::storage::{Database, RaceStore};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn finished_result(attempt: &RaceAttempt) -> RaceResult {
    RaceResult {
        attempt_id: attempt.id,
        track_id: attempt.track_id,
        user_id: attempt.user_id,
        state: RaceState::Finished,
        reason: None,
        distance_m: 1000.0,
        percent_complete: 100.0,
        percent_missed: 0.0,
        laps_complete: 1,
        average_speed_ms: 20.0,
        stopwatch_ms: 50_000,
        finishing_place: Some(1),
        ended_at: at(50),
        fake: false,
    }
}

/// Test startup recovery cancels orphans and leaves terminal attempts alone
#[tokio::test]
async fn test_startup_recovery() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store: Arc<dyn RaceStore> = db.clone();
    let track = saved_sprint(&db, 0.0);

    let orphan_a = RaceAttempt::start(track.id, Uuid::new_v4(), at(0), false);
    let orphan_b = RaceAttempt::start(track.id, Uuid::new_v4(), at(5), true);
    let done = RaceAttempt::start(track.id, Uuid::new_v4(), at(0), false);
    for attempt in [&orphan_a, &orphan_b, &done] {
        db.insert_attempt(attempt).unwrap();
    }
    db.save_terminal_result(&finished_result(&done)).unwrap();

    let registry = SessionRegistry::new(16);
    let report = registry.recover_stuck_attempts(&store).await.unwrap();

    let mut cancelled = report.cancelled.clone();
    cancelled.sort();
    let mut expected = vec![orphan_a.id, orphan_b.id];
    expected.sort();
    assert_eq!(cancelled, expected);
    assert_eq!(report.live, 0);

    for id in expected {
        let stored = db.get_attempt(id).unwrap().unwrap();
        assert_eq!(stored.state, RaceState::Cancelled);
        assert_eq!(stored.reason.as_deref(), Some("abandoned"));
    }

    let untouched = db.get_attempt(done.id).unwrap().unwrap();
    assert_eq!(untouched.state, RaceState::Finished);
    assert_eq!(untouched.finishing_place, Some(1));
    assert_eq!(untouched.stopwatch_ms, Some(50_000));

    assert!(db.find_ongoing_attempts().unwrap().is_empty());
    let again = registry.recover_stuck_attempts(&store).await.unwrap();
    assert!(again.cancelled.is_empty());
}

/// Test a periodic sweep spares attempts owned by live sessions
#[tokio::test]
async fn test_sweep_spares_live_attempts() {
    let harness = Harness::new();
    let track = saved_sprint(&harness.db, 0.0);

    let mut live = harness.connect(Uuid::new_v4()).await;
    let started = harness
        .coordinator
        .start_race(&mut live, start_request(&track, 0))
        .await
        .unwrap();

    let orphan = RaceAttempt::start(track.id, Uuid::new_v4(), at(0), false);
    harness.db.insert_attempt(&orphan).unwrap();

    let report = harness.coordinator.recover().await.unwrap();
    assert_eq!(report.cancelled, vec![orphan.id]);
    assert_eq!(report.live, 1);
    assert_eq!(
        harness.db.get_attempt(started.attempt_id).unwrap().unwrap().state,
        RaceState::Ongoing
    );
}

/// Test a disconnect leaves the attempt for the next sweep
#[tokio::test]
async fn test_disconnect_then_sweep() {
    let harness = Harness::new();
    let track = saved_sprint(&harness.db, 0.0);
    let user = Uuid::new_v4();
    let mut session = harness.connect(user).await;

    let started = harness
        .coordinator
        .start_race(&mut session, start_request(&track, 0))
        .await
        .unwrap();
    harness.coordinator.handle_disconnect(&mut session).await;
    harness.registry.unregister(session.connection_id()).await;

    assert!(!session.is_connected());
    assert!(session.active_race().is_none());
    assert_eq!(harness.registry.reserved_attempt(user).await, None);
    assert_eq!(
        harness.db.get_attempt(started.attempt_id).unwrap().unwrap().state,
        RaceState::Ongoing
    );

    let report = harness.coordinator.recover().await.unwrap();
    assert_eq!(report.cancelled, vec![started.attempt_id]);
}

/// Test reconnecting and starting again repairs the orphan inline
#[tokio::test]
async fn test_new_start_repairs_orphan() {
    let harness = Harness::new();
    let track = saved_sprint(&harness.db, 0.0);
    let user = Uuid::new_v4();

    let mut first = harness.connect(user).await;
    let orphaned = harness
        .coordinator
        .start_race(&mut first, start_request(&track, 0))
        .await
        .unwrap();
    harness.coordinator.handle_disconnect(&mut first).await;

    let mut second = harness.connect(user).await;
    let fresh = harness
        .coordinator
        .start_race(&mut second, start_request(&track, 30))
        .await
        .unwrap();

    let old = harness.db.get_attempt(orphaned.attempt_id).unwrap().unwrap();
    assert_eq!(old.state, RaceState::Cancelled);
    assert_eq!(old.reason.as_deref(), Some("abandoned"));
    assert_eq!(harness.db.find_ongoing_attempts().unwrap(), vec![fresh.attempt_id]);
}

/// Test recovery after a restart against an on-disk database
#[tokio::test]
async fn test_recovery_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hawkspeed.db");

    let attempt_id = {
        let db = Database::open(&path).unwrap();
        let track = saved_sprint(&db, 0.0);
        let attempt = RaceAttempt::start(track.id, Uuid::new_v4(), at(0), false);
        db.insert_attempt(&attempt).unwrap();
        attempt.id
    };

    let store: Arc<dyn RaceStore> = Arc::new(Database::open(&path).unwrap());
    let report = SessionRegistry::new(16).recover_stuck_attempts(&store).await.unwrap();
    assert_eq!(report.cancelled, vec![attempt_id]);
}

/// Test the registry stays usable while a slow sweep reads storage
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registry_responsive_during_sweep() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let track = saved_sprint(&db, 0.0);
    let orphan = RaceAttempt::start(track.id, Uuid::new_v4(), at(0), false);
    db.insert_attempt(&orphan).unwrap();

    let store: Arc<dyn RaceStore> =
        Arc::new(FlakyStore::new(Arc::clone(&db), 0).with_scan_delay(Duration::from_millis(300)));
    let registry = Arc::new(SessionRegistry::new(16));

    let sweep = {
        let registry = Arc::clone(&registry);
        let store = Arc::clone(&store);
        tokio::spawn(async move { registry.recover_stuck_attempts(&store).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let handle = tokio::time::timeout(Duration::from_millis(150), registry.register(Uuid::new_v4()))
        .await
        .expect("register waited on the sweep");
    assert!(registry.lookup(handle.connection_id).await.is_some());

    let report = sweep.await.unwrap().unwrap();
    assert_eq!(report.cancelled, vec![orphan.id]);
}

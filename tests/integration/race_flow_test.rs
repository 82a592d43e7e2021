//! Integration tests for the start → update → result flow

use crate::harness::{fix_along, saved_sprint, start_request, test_config, FlakyStore, Harness};
use hawkspeed::racing::{RaceError, RaceEvent, RaceState};
use hawkspeed::storage::{Database, RaceStore};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Test a full sprint is persisted with its place on the leaderboard
#[tokio::test]
async fn test_sprint_finish_persisted() {
    let harness = Harness::new();
    let track = saved_sprint(&harness.db, 0.0);
    let user = Uuid::new_v4();
    let mut session = harness.connect(user).await;

    let started = harness
        .coordinator
        .start_race(&mut session, start_request(&track, 0))
        .await
        .unwrap();
    assert_eq!(started.track_hash, track.hash);
    assert_eq!(harness.registry.reserved_attempt(user).await, Some((started.attempt_id, track.id)));

    let stored = harness.db.get_attempt(started.attempt_id).unwrap().unwrap();
    assert_eq!(stored.state, RaceState::Ongoing);

    for (distance, secs) in [(250.0, 10), (500.0, 20)] {
        let event = harness
            .coordinator
            .on_position(&mut session, fix_along(&track, distance, secs))
            .await
            .unwrap();
        assert!(matches!(event, Some(RaceEvent::Progress(_))));
    }

    let event = harness
        .coordinator
        .on_position(&mut session, fix_along(&track, 1000.0, 40))
        .await
        .unwrap();
    let Some(RaceEvent::Finished(result)) = event else {
        panic!("expected finish, got {:?}", event);
    };
    assert_eq!(result.finishing_place, Some(1));
    assert!(session.active_race().is_none());
    assert_eq!(harness.registry.reserved_attempt(user).await, None);

    let stored = harness.db.get_attempt(started.attempt_id).unwrap().unwrap();
    assert_eq!(stored.state, RaceState::Finished);
    assert_eq!(stored.stopwatch_ms, Some(40_000));
    assert_eq!(stored.finishing_place, Some(1));
    assert!(harness.db.has_user_finished(track.id, user).unwrap());
}

/// Test a slower second finisher is placed behind the first
#[tokio::test]
async fn test_second_finisher_place() {
    let harness = Harness::new();
    let track = saved_sprint(&harness.db, 0.0);

    for (i, finish_secs) in [40, 55].into_iter().enumerate() {
        let mut session = harness.connect(Uuid::new_v4()).await;
        harness
            .coordinator
            .start_race(&mut session, start_request(&track, 0))
            .await
            .unwrap();
        let event = harness
            .coordinator
            .on_position(&mut session, fix_along(&track, 1000.0, finish_secs))
            .await
            .unwrap();
        let Some(RaceEvent::Finished(result)) = event else {
            panic!("expected finish, got {:?}", event);
        };
        assert_eq!(result.finishing_place, Some(i as u32 + 1));
    }
}

/// Test a player can only run one race at a time
#[tokio::test]
async fn test_second_start_refused() {
    let harness = Harness::new();
    let track = saved_sprint(&harness.db, 0.0);
    let mut session = harness.connect(Uuid::new_v4()).await;

    let started = harness
        .coordinator
        .start_race(&mut session, start_request(&track, 0))
        .await
        .unwrap();
    let again = harness
        .coordinator
        .start_race(&mut session, start_request(&track, 1))
        .await;
    assert_eq!(again, Err(RaceError::AttemptAlreadyActive(started.attempt_id)));
}

/// Test unknown and unverified tracks cannot be raced
#[tokio::test]
async fn test_start_requires_verified_track() {
    let harness = Harness::new();
    let mut track = saved_sprint(&harness.db, 0.0);
    track.verified = false;
    harness.db.save_track(&track).unwrap();
    let mut session = harness.connect(Uuid::new_v4()).await;

    let result = harness
        .coordinator
        .start_race(&mut session, start_request(&track, 0))
        .await;
    assert_eq!(result, Err(RaceError::TrackNotFound(track.id)));

    let mut request = start_request(&track, 0);
    request.track_id = Uuid::new_v4();
    let result = harness.coordinator.start_race(&mut session, request.clone()).await;
    assert_eq!(result, Err(RaceError::TrackNotFound(request.track_id)));
    assert!(harness.db.find_ongoing_attempts().unwrap().is_empty());
}

/// Test a cancelled race is stored and frees the player to race again
#[tokio::test]
async fn test_cancel_then_restart() {
    let harness = Harness::new();
    let track = saved_sprint(&harness.db, 0.0);
    let mut session = harness.connect(Uuid::new_v4()).await;

    let first = harness
        .coordinator
        .start_race(&mut session, start_request(&track, 0))
        .await
        .unwrap();
    let event = harness.coordinator.cancel_race(&mut session).await.unwrap();
    assert!(matches!(event, RaceEvent::Cancelled(_)));

    let stored = harness.db.get_attempt(first.attempt_id).unwrap().unwrap();
    assert_eq!(stored.state, RaceState::Cancelled);
    assert_eq!(stored.reason.as_deref(), Some("requested"));

    assert_eq!(harness.coordinator.cancel_race(&mut session).await, Err(RaceError::NotRacing));
    assert!(harness
        .coordinator
        .start_race(&mut session, start_request(&track, 10))
        .await
        .is_ok());
}

/// Test updates outside a race are accepted and stale ones refused
#[tokio::test]
async fn test_updates_without_race() {
    let harness = Harness::new();
    let track = saved_sprint(&harness.db, 0.0);
    let mut session = harness.connect(Uuid::new_v4()).await;

    let event = harness
        .coordinator
        .on_position(&mut session, fix_along(&track, 100.0, 5))
        .await
        .unwrap();
    assert!(event.is_none());

    let stale = harness
        .coordinator
        .on_position(&mut session, fix_along(&track, 100.0, 4))
        .await;
    assert!(matches!(stale, Err(RaceError::StaleUpdate { .. })));
}

/// Test progress checkpoints reach the database
#[tokio::test]
async fn test_progress_checkpointed() {
    let harness = Harness::new();
    let track = saved_sprint(&harness.db, 0.0);
    let mut session = harness.connect(Uuid::new_v4()).await;

    let started = harness
        .coordinator
        .start_race(&mut session, start_request(&track, 0))
        .await
        .unwrap();
    harness
        .coordinator
        .on_position(&mut session, fix_along(&track, 400.0, 16))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = harness.db.get_attempt(started.attempt_id).unwrap().unwrap();
    assert_eq!(stored.state, RaceState::Ongoing);
    assert!((stored.distance_m - 400.0).abs() < 1.0);
    assert!((stored.percent_complete - 40.0).abs() < 0.5);
}

/// Test a transient write failure is retried before the result is reported
#[tokio::test]
async fn test_terminal_write_retried() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let track = saved_sprint(&db, 0.0);
    let store = Arc::new(FlakyStore::new(Arc::clone(&db), 2));
    let harness = Harness::with_store(Arc::clone(&db), store.clone(), test_config());
    let mut session = harness.connect(Uuid::new_v4()).await;

    let started = harness
        .coordinator
        .start_race(&mut session, start_request(&track, 0))
        .await
        .unwrap();
    let event = harness
        .coordinator
        .on_position(&mut session, fix_along(&track, 1000.0, 45))
        .await
        .unwrap();

    assert!(matches!(event, Some(RaceEvent::Finished(_))));
    assert_eq!(store.terminal_calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        db.get_attempt(started.attempt_id).unwrap().unwrap().state,
        RaceState::Finished
    );
}

/// Test exhausted retries keep the race attached until a later write succeeds
#[tokio::test]
async fn test_terminal_write_exhausted_then_recovered() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let track = saved_sprint(&db, 0.0);
    let store = Arc::new(FlakyStore::new(Arc::clone(&db), 10));
    let harness = Harness::with_store(Arc::clone(&db), store.clone(), test_config());
    let user = Uuid::new_v4();
    let mut session = harness.connect(user).await;

    let started = harness
        .coordinator
        .start_race(&mut session, start_request(&track, 0))
        .await
        .unwrap();
    let failed = harness
        .coordinator
        .on_position(&mut session, fix_along(&track, 1000.0, 45))
        .await;
    assert!(matches!(failed, Err(RaceError::PersistenceFailure(_))));
    assert!(session.active_race().is_some());
    assert_eq!(
        db.get_attempt(started.attempt_id).unwrap().unwrap().state,
        RaceState::Ongoing
    );

    store.fail_terminal.store(0, Ordering::SeqCst);
    let event = harness
        .coordinator
        .on_position(&mut session, fix_along(&track, 1000.0, 46))
        .await
        .unwrap();
    let Some(RaceEvent::Finished(result)) = event else {
        panic!("expected finish, got {:?}", event);
    };
    // Scored at the original crossing, not the retry
    assert_eq!(result.stopwatch_ms, 45_000);
    assert!(session.active_race().is_none());
    assert_eq!(harness.registry.reserved_attempt(user).await, None);
}

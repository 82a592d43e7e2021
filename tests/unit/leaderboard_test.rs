//! Unit tests for leaderboard ranking and finishing places

use chrono::{DateTime, Duration, Utc};
use hawkspeed::racing::leaderboard::{finishing_place, rank_attempts};
use hawkspeed::racing::{RaceAttempt, RaceResult, RaceState};
use hawkspeed::storage::Environment;
use uuid::Uuid;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn finished(track: Uuid, stopwatch_ms: u64, finished_secs: i64, fake: bool) -> RaceAttempt {
    let finished_at = at(finished_secs);
    let mut attempt = RaceAttempt::start(
        track,
        Uuid::new_v4(),
        finished_at - Duration::milliseconds(stopwatch_ms as i64),
        fake,
    );
    attempt.state = RaceState::Finished;
    attempt.stopwatch_ms = Some(stopwatch_ms);
    attempt.finished_at = Some(finished_at);
    attempt.percent_complete = 100.0;
    attempt
}

fn result_for(attempt: &RaceAttempt) -> RaceResult {
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
        stopwatch_ms: attempt.stopwatch_ms.unwrap_or_default(),
        finishing_place: None,
        ended_at: attempt.finished_at.unwrap_or_else(Utc::now),
        fake: attempt.fake,
    }
}

/// Test ranking by stopwatch, earlier finish breaking ties
#[test]
fn test_rank_order() {
    let track = Uuid::new_v4();
    let slow = finished(track, 70_000, 100, false);
    let fast = finished(track, 50_000, 300, false);
    let tie_late = finished(track, 60_000, 200, false);
    let tie_early = finished(track, 60_000, 150, false);

    let board = rank_attempts(&[slow.clone(), fast.clone(), tie_late.clone(), tie_early.clone()], true);
    let order: Vec<Uuid> = board.iter().map(|e| e.attempt_id).collect();
    assert_eq!(order, vec![fast.id, tie_early.id, tie_late.id, slow.id]);
    assert_eq!(board.iter().map(|e| e.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
}

/// Test attempts that did not finish never rank
#[test]
fn test_unfinished_excluded() {
    let track = Uuid::new_v4();
    let mut dq = finished(track, 10_000, 10, false);
    dq.state = RaceState::Disqualified;
    let ok = finished(track, 80_000, 90, false);

    let board = rank_attempts(&[dq, ok.clone()], true);
    assert_eq!(board.len(), 1);
    assert_eq!(board[0].attempt_id, ok.id);
}

/// Test fake attempts only rank outside live environments
#[test]
fn test_fake_attempts_policy() {
    let track = Uuid::new_v4();
    let fake = finished(track, 30_000, 10, true);
    let real = finished(track, 40_000, 20, false);
    let attempts = [fake.clone(), real.clone()];

    for env in [Environment::Production, Environment::LiveDevelopment] {
        let board = rank_attempts(&attempts, env.includes_fake_attempts());
        assert_eq!(board.len(), 1, "{}", env);
        assert_eq!(board[0].attempt_id, real.id);
        assert_eq!(finishing_place(&attempts, &result_for(&fake), env.includes_fake_attempts()), None);
    }

    for env in [Environment::Development, Environment::Test] {
        let board = rank_attempts(&attempts, env.includes_fake_attempts());
        assert_eq!(board.len(), 2, "{}", env);
        assert_eq!(board[0].attempt_id, fake.id);
    }
}

/// Test finishing place counts only those ranked ahead
#[test]
fn test_finishing_place() {
    let track = Uuid::new_v4();
    let existing = vec![
        finished(track, 50_000, 10, false),
        finished(track, 60_000, 20, false),
        finished(track, 90_000, 30, false),
    ];

    let newcomer = finished(track, 55_000, 100, false);
    assert_eq!(finishing_place(&existing, &result_for(&newcomer), false), Some(2));

    let fastest = finished(track, 1_000, 100, false);
    assert_eq!(finishing_place(&existing, &result_for(&fastest), false), Some(1));

    // Equal time, later finish goes behind
    let tied = finished(track, 60_000, 100, false);
    assert_eq!(finishing_place(&existing, &result_for(&tied), false), Some(3));
}

/// Test an attempt is not counted against itself once stored
#[test]
fn test_finishing_place_ignores_self() {
    let track = Uuid::new_v4();
    let me = finished(track, 45_000, 50, false);
    let existing = vec![finished(track, 50_000, 10, false), me.clone()];

    assert_eq!(finishing_place(&existing, &result_for(&me), false), Some(1));
}

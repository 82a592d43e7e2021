//! Track leaderboards, computed from finished attempts on query.

use super::attempt::{RaceAttempt, RaceResult, RaceState};
use crate::storage::{DatabaseError, Environment, RaceStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Leaderboard entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Rank on leaderboard (1-indexed)
    pub rank: u32,
    pub attempt_id: Uuid,
    pub user_id: Uuid,
    /// Elapsed race time
    pub stopwatch_ms: u64,
    pub average_speed_ms: f64,
    pub finished_at: DateTime<Utc>,
    pub fake: bool,
}

/// Leaderboard query options.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LeaderboardQuery {
    /// Only this user's attempts ("my" filter); ranks stay global
    pub user_id: Option<Uuid>,
    pub limit: Option<usize>,
}

struct Ranked<'a> {
    attempt: &'a RaceAttempt,
    stopwatch_ms: u64,
    finished_at: DateTime<Utc>,
}

fn compare(a_ms: u64, a_at: DateTime<Utc>, b_ms: u64, b_at: DateTime<Utc>) -> Ordering {
    a_ms.cmp(&b_ms).then(a_at.cmp(&b_at))
}

fn eligible(attempts: &[RaceAttempt], include_fake: bool) -> Vec<Ranked<'_>> {
    attempts
        .iter()
        .filter(|a| a.state == RaceState::Finished && (include_fake || !a.fake))
        .filter_map(|a| {
            Some(Ranked {
                attempt: a,
                stopwatch_ms: a.stopwatch_ms?,
                finished_at: a.finished_at?,
            })
        })
        .collect()
}

/// Rank finished attempts by stopwatch, earlier finish breaking ties.
pub fn rank_attempts(attempts: &[RaceAttempt], include_fake: bool) -> Vec<LeaderboardEntry> {
    let mut ranked = eligible(attempts, include_fake);
    ranked.sort_by(|a, b| {
        compare(a.stopwatch_ms, a.finished_at, b.stopwatch_ms, b.finished_at)
            .then(a.attempt.id.cmp(&b.attempt.id))
    });

    ranked
        .into_iter()
        .enumerate()
        .map(|(i, r)| LeaderboardEntry {
            rank: i as u32 + 1,
            attempt_id: r.attempt.id,
            user_id: r.attempt.user_id,
            stopwatch_ms: r.stopwatch_ms,
            average_speed_ms: r.attempt.average_speed_ms,
            finished_at: r.finished_at,
            fake: r.attempt.fake,
        })
        .collect()
}

/// Place a newly finished result among the existing finishers.
///
/// Fake results get no place where fake attempts are not ranked.
pub fn finishing_place(existing: &[RaceAttempt], result: &RaceResult, include_fake: bool) -> Option<u32> {
    if result.state != RaceState::Finished || (result.fake && !include_fake) {
        return None;
    }

    let ahead = eligible(existing, include_fake)
        .iter()
        .filter(|r| r.attempt.id != result.attempt_id)
        .filter(|r| {
            compare(r.stopwatch_ms, r.finished_at, result.stopwatch_ms, result.ended_at) == Ordering::Less
        })
        .count();

    Some(ahead as u32 + 1)
}

/// Leaderboard for a track under the environment's fake-attempt policy.
pub fn leaderboard_for(
    store: &dyn RaceStore,
    track_id: Uuid,
    environment: Environment,
    query: LeaderboardQuery,
) -> Result<Vec<LeaderboardEntry>, DatabaseError> {
    let attempts = store.finished_attempts(track_id)?;
    let entries = rank_attempts(&attempts, environment.includes_fake_attempts())
        .into_iter()
        .filter(|e| query.user_id.map_or(true, |u| e.user_id == u));

    Ok(match query.limit {
        Some(limit) => entries.take(limit).collect(),
        None => entries.collect(),
    })
}

//! Race attempt records and the values that flow out of a live race.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a race attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceState {
    NotStarted,
    Ongoing,
    Finished,
    Disqualified,
    Cancelled,
}

impl RaceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RaceState::Finished | RaceState::Disqualified | RaceState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RaceState::NotStarted => "not_started",
            RaceState::Ongoing => "ongoing",
            RaceState::Finished => "finished",
            RaceState::Disqualified => "disqualified",
            RaceState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(RaceState::NotStarted),
            "ongoing" => Some(RaceState::Ongoing),
            "finished" => Some(RaceState::Finished),
            "disqualified" => Some(RaceState::Disqualified),
            "cancelled" => Some(RaceState::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a race was disqualified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisqualifyReason {
    /// Too far from the path for longer than the grace period
    OffTrack,
    /// Travelled too much of the track backwards
    ExcessiveReversal,
    /// Jumped ahead further than could have been driven
    SkippedTrack,
}

impl DisqualifyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisqualifyReason::OffTrack => "off-track",
            DisqualifyReason::ExcessiveReversal => "excessive-reversal",
            DisqualifyReason::SkippedTrack => "skipped-track",
        }
    }
}

/// Why a race was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelReason {
    /// The player asked to stop
    Requested,
    /// No live session owned the attempt any more
    Abandoned,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Requested => "requested",
            CancelReason::Abandoned => "abandoned",
        }
    }
}

/// A persisted race attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceAttempt {
    pub id: Uuid,
    pub track_id: Uuid,
    pub user_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub state: RaceState,
    /// Disqualification or cancellation reason
    pub reason: Option<String>,
    pub distance_m: f64,
    pub percent_complete: f64,
    pub percent_missed: f64,
    pub laps_complete: u32,
    pub average_speed_ms: f64,
    pub stopwatch_ms: Option<u64>,
    /// 1-based, set once finished
    pub finishing_place: Option<u32>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Unproven attempt, only ranked outside live environments
    pub fake: bool,
}

impl RaceAttempt {
    /// A fresh ongoing attempt.
    pub fn start(track_id: Uuid, user_id: Uuid, started_at: DateTime<Utc>, fake: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_id,
            user_id,
            started_at,
            state: RaceState::Ongoing,
            reason: None,
            distance_m: 0.0,
            percent_complete: 0.0,
            percent_missed: 0.0,
            laps_complete: 0,
            average_speed_ms: 0.0,
            stopwatch_ms: None,
            finishing_place: None,
            finished_at: None,
            fake,
        }
    }
}

/// Progress of an ongoing attempt at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub attempt_id: Uuid,
    pub distance_m: f64,
    pub percent_complete: f64,
    pub percent_missed: f64,
    pub laps_complete: u32,
    pub average_speed_ms: f64,
    pub stopwatch_ms: u64,
    /// Current perpendicular distance from the path
    pub offset_m: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Final state of an attempt, written exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    pub attempt_id: Uuid,
    pub track_id: Uuid,
    pub user_id: Uuid,
    pub state: RaceState,
    pub reason: Option<String>,
    pub distance_m: f64,
    pub percent_complete: f64,
    pub percent_missed: f64,
    pub laps_complete: u32,
    pub average_speed_ms: f64,
    pub stopwatch_ms: u64,
    pub finishing_place: Option<u32>,
    pub ended_at: DateTime<Utc>,
    pub fake: bool,
}

impl RaceResult {
    /// Cancellation for an attempt known only from storage.
    pub fn abandoned(attempt: &RaceAttempt, ended_at: DateTime<Utc>) -> Self {
        let elapsed = (ended_at - attempt.started_at).num_milliseconds().max(0) as u64;
        Self {
            attempt_id: attempt.id,
            track_id: attempt.track_id,
            user_id: attempt.user_id,
            state: RaceState::Cancelled,
            reason: Some(CancelReason::Abandoned.as_str().to_string()),
            distance_m: attempt.distance_m,
            percent_complete: attempt.percent_complete,
            percent_missed: attempt.percent_missed,
            laps_complete: attempt.laps_complete,
            average_speed_ms: attempt.average_speed_ms,
            stopwatch_ms: attempt.stopwatch_ms.unwrap_or(elapsed),
            finishing_place: None,
            ended_at,
            fake: attempt.fake,
        }
    }
}

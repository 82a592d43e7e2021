//! Live races: progress scoring, results and leaderboards.

pub mod attempt;
pub mod coordinator;
pub mod engine;
pub mod leaderboard;
pub mod progress;

pub use attempt::{CancelReason, DisqualifyReason, ProgressSnapshot, RaceAttempt, RaceResult, RaceState};
pub use coordinator::{RaceCoordinator, RaceStarted};
pub use engine::{RaceEvent, RaceProgressEngine, StartRequest};
pub use leaderboard::{leaderboard_for, LeaderboardEntry, LeaderboardQuery};
pub use progress::ProgressWriter;

use crate::session::SessionError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Race errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RaceError {
    #[error("Start conditions not met: {0}")]
    StartConditionsNotMet(String),

    #[error("Attempt {0} is already ongoing")]
    AttemptAlreadyActive(Uuid),

    #[error("Stale update logged at {at}, last accepted {last}")]
    StaleUpdate {
        at: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("Track {0} not found or not verified")]
    TrackNotFound(Uuid),

    #[error("Not in a race")]
    NotRacing,

    #[error("Position is not a valid coordinate")]
    InvalidPosition,

    #[error("Failed to persist race result: {0}")]
    PersistenceFailure(String),
}

impl RaceError {
    /// Short machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            RaceError::StartConditionsNotMet(_) => "start-conditions-not-met",
            RaceError::AttemptAlreadyActive(_) => "attempt-already-active",
            RaceError::StaleUpdate { .. } => "stale-update",
            RaceError::TrackNotFound(_) => "track-not-found",
            RaceError::NotRacing => "not-racing",
            RaceError::InvalidPosition => "invalid-position",
            RaceError::PersistenceFailure(_) => "persistence-failure",
        }
    }
}

impl From<SessionError> for RaceError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::StaleUpdate { at, last } => RaceError::StaleUpdate { at, last },
            SessionError::AlreadyAttached(attempt_id) => RaceError::AttemptAlreadyActive(attempt_id),
            SessionError::InvalidPosition => RaceError::InvalidPosition,
            SessionError::NotRegistered(_) => RaceError::NotRacing,
        }
    }
}

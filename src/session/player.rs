//! Per-connection player state.

use super::SessionError;
use crate::geometry::PositionFix;
use crate::racing::{ProgressSnapshot, RaceProgressEngine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connectivity of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// What spectators see of a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: f64,
    pub speed_ms: f64,
    pub logged_at: DateTime<Utc>,
    /// Track being raced, if any
    pub track_id: Option<Uuid>,
    pub progress: Option<ProgressSnapshot>,
}

/// A connected player. Owns the engine of the race they are in.
#[derive(Debug)]
pub struct PlayerSession {
    connection_id: Uuid,
    user_id: Uuid,
    status: ConnectionStatus,
    connected_at: DateTime<Utc>,
    last_fix: Option<PositionFix>,
    race: Option<RaceProgressEngine>,
}

impl PlayerSession {
    pub fn new(connection_id: Uuid, user_id: Uuid) -> Self {
        Self {
            connection_id,
            user_id,
            status: ConnectionStatus::Connected,
            connected_at: Utc::now(),
            last_fix: None,
            race: None,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn last_fix(&self) -> Option<&PositionFix> {
        self.last_fix.as_ref()
    }

    pub fn last_bearing(&self) -> Option<f64> {
        self.last_fix.map(|f| f.bearing)
    }

    /// Accept a new position if it is newer than the last one.
    ///
    /// Older or equal timestamps are dropped and leave the session as it was.
    pub fn update_position(&mut self, fix: PositionFix) -> Result<(), SessionError> {
        if !fix.is_valid() {
            return Err(SessionError::InvalidPosition);
        }

        if let Some(last) = &self.last_fix {
            if fix.logged_at <= last.logged_at {
                tracing::warn!(
                    "Dropping out-of-order update for user {} ({} <= {})",
                    self.user_id,
                    fix.logged_at,
                    last.logged_at
                );
                return Err(SessionError::StaleUpdate {
                    at: fix.logged_at,
                    last: last.logged_at,
                });
            }
        }

        self.last_fix = Some(fix);
        Ok(())
    }

    pub fn attach_to_race(&mut self, engine: RaceProgressEngine) -> Result<(), SessionError> {
        if let Some(existing) = &self.race {
            return Err(SessionError::AlreadyAttached(existing.attempt_id()));
        }
        self.race = Some(engine);
        Ok(())
    }

    pub fn detach(&mut self) -> Option<RaceProgressEngine> {
        self.race.take()
    }

    pub fn active_race(&self) -> Option<&RaceProgressEngine> {
        self.race.as_ref()
    }

    pub fn active_race_mut(&mut self) -> Option<&mut RaceProgressEngine> {
        self.race.as_mut()
    }

    pub fn mark_disconnected(&mut self) {
        self.status = ConnectionStatus::Disconnected;
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Current state for spectators; `None` until a position is known.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let fix = self.last_fix?;
        Some(SessionSnapshot {
            user_id: self.user_id,
            latitude: fix.latitude,
            longitude: fix.longitude,
            bearing: fix.bearing,
            speed_ms: fix.speed_ms,
            logged_at: fix.logged_at,
            track_id: self.race.as_ref().map(|r| r.track().id),
            progress: self.race.as_ref().map(|r| r.snapshot()),
        })
    }
}

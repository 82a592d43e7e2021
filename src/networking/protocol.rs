//! WebSocket message definitions.
//!
//! Text frames carry JSON, binary frames carry bincode. Both encode the
//! same externally tagged enums, so a client may use either.

use crate::geometry::{GeoPoint, PositionFix};
use crate::racing::{ProgressSnapshot, RaceError, RaceEvent, RaceResult, RaceStarted, StartRequest};
use crate::session::SessionSnapshot;
use crate::tracks::TrackSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u8 = 1;

/// A location report from a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    pub latitude: f64,
    pub longitude: f64,
    /// Heading in degrees
    pub rotation: f64,
    /// Meters per second
    pub speed: f64,
    pub logged_at: DateTime<Utc>,
}

impl From<PlayerUpdate> for PositionFix {
    fn from(u: PlayerUpdate) -> Self {
        PositionFix {
            latitude: u.latitude,
            longitude: u.longitude,
            bearing: u.rotation,
            speed_ms: u.speed,
            logged_at: u.logged_at,
        }
    }
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message on a connection; identity is already authenticated
    Join { user_id: Uuid },
    PlayerUpdate(PlayerUpdate),
    StartRace {
        track_id: Uuid,
        started_position: PlayerUpdate,
        countdown_position: Option<PlayerUpdate>,
        #[serde(default)]
        fake: bool,
    },
    CancelRace,
    /// Receive other players' updates for a track, or stop with `None`
    Spectate { track_id: Option<Uuid> },
    /// The map area the client is showing
    Viewport { south_west: GeoPoint, north_east: GeoPoint },
    Leave,
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Build a start request from a `StartRace` message.
    pub fn start_request(&self) -> Option<StartRequest> {
        match self {
            ClientMessage::StartRace {
                track_id,
                started_position,
                countdown_position,
                fake,
            } => Some(StartRequest {
                track_id: *track_id,
                started: (*started_position).into(),
                countdown: countdown_position.map(Into::into),
                fake: *fake,
            }),
            _ => None,
        }
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        connection_id: Uuid,
        user_id: Uuid,
        protocol_version: u8,
        server_version: String,
    },
    PlayerUpdateAck { logged_at: DateTime<Utc> },
    RaceStarted {
        attempt_id: Uuid,
        track_id: Uuid,
        track_hash: String,
        started_at: DateTime<Utc>,
    },
    RaceStartRefused { code: String, reason: String },
    RaceProgress(ProgressSnapshot),
    RaceFinished(RaceResult),
    RaceDisqualified(RaceResult),
    RaceCancelled(RaceResult),
    SpectatorUpdate(SessionSnapshot),
    /// Tracks starting inside the last viewport
    TracksInView { tracks: Vec<TrackSummary> },
    /// The connection is being closed by the server
    Kicked { reason: String },
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn welcome(connection_id: Uuid, user_id: Uuid) -> Self {
        ServerMessage::Welcome {
            connection_id,
            user_id,
            protocol_version: PROTOCOL_VERSION,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Whether this message ends a race.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerMessage::RaceFinished(_)
                | ServerMessage::RaceDisqualified(_)
                | ServerMessage::RaceCancelled(_)
        )
    }
}

impl From<RaceEvent> for ServerMessage {
    fn from(event: RaceEvent) -> Self {
        match event {
            RaceEvent::Progress(snapshot) => ServerMessage::RaceProgress(snapshot),
            RaceEvent::Finished(result) => ServerMessage::RaceFinished(result),
            RaceEvent::Disqualified(result) => ServerMessage::RaceDisqualified(result),
            RaceEvent::Cancelled(result) => ServerMessage::RaceCancelled(result),
        }
    }
}

impl From<RaceStarted> for ServerMessage {
    fn from(started: RaceStarted) -> Self {
        ServerMessage::RaceStarted {
            attempt_id: started.attempt_id,
            track_id: started.track_id,
            track_hash: started.track_hash,
            started_at: started.started_at,
        }
    }
}

impl From<&RaceError> for ServerMessage {
    fn from(e: &RaceError) -> Self {
        ServerMessage::error(e.code(), e.to_string())
    }
}

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Binary encoding error: {0}")]
    Binary(#[from] bincode::Error),

    #[error("Expected a join message first")]
    NotJoined,
}

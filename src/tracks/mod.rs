//! Race tracks and the verification pipeline that makes them raceable.

pub mod import;
pub mod pipeline;
pub mod snap;
pub mod verify;

pub use import::{ImportError, ImportedTrack};
pub use pipeline::{PipelineError, SavedTrack, SnapOutcome, TrackVerificationPipeline};
pub use snap::{GoogleRoadsSnapper, RoadSnapper, SnapError, SnapResponse};
pub use verify::{verify_path, VerificationOutcome};

use crate::geometry::{GeoPoint, TrackPath};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Track layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    /// Point to point, one pass
    #[default]
    Sprint,
    /// Closed loop raced over one or more laps
    Circuit,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::Sprint => "sprint",
            TrackType::Circuit => "circuit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sprint" => Some(TrackType::Sprint),
            "circuit" => Some(TrackType::Circuit),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A track and its scoring path.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub track_type: TrackType,
    /// Laps to complete; always 1 for sprints
    pub laps: u32,
    pub verified: bool,
    pub verification_failure: Option<String>,
    pub snapped: bool,
    pub snap_failure: Option<String>,
    pub path: TrackPath,
    /// Content hash of `path`
    pub hash: String,
    /// Heading required at the start line
    pub start_bearing: f64,
    pub created_at: DateTime<Utc>,
}

impl Track {
    /// Create an unverified track over `path`.
    pub fn new(owner_id: Uuid, name: String, track_type: TrackType, laps: u32, path: TrackPath) -> Self {
        let laps = match track_type {
            TrackType::Sprint => 1,
            TrackType::Circuit => laps.max(1),
        };

        Self {
            id: Uuid::new_v4(),
            owner_id,
            name,
            description: None,
            track_type,
            laps,
            verified: false,
            verification_failure: None,
            snapped: false,
            snap_failure: None,
            hash: path.content_hash(),
            start_bearing: path.start_bearing(),
            path,
            created_at: Utc::now(),
        }
    }

    pub fn is_circuit(&self) -> bool {
        self.track_type == TrackType::Circuit
    }

    /// Length of a single lap in meters.
    pub fn lap_length(&self) -> f64 {
        self.path.length()
    }

    /// Distance required to finish the whole race.
    pub fn race_length(&self) -> f64 {
        self.path.length() * self.laps as f64
    }
}

/// What a client needs to show a track on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub track_type: TrackType,
    pub laps: u32,
    pub start: GeoPoint,
    pub start_bearing: f64,
    pub length_m: f64,
    /// Only verified tracks can be raced
    pub verified: bool,
}

impl From<&Track> for TrackSummary {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id,
            name: track.name.clone(),
            description: track.description.clone(),
            track_type: track.track_type,
            laps: track.laps,
            start: *track.path.origin(),
            start_bearing: track.start_bearing,
            length_m: track.path.length(),
            verified: track.verified,
        }
    }
}

//! JSON export format for verified tracks.
//!
//! An export carries the final geometry and its hash. Re-importing checks
//! the hash and keeps the snapped flag so the snap stage can be skipped.

use super::{ImportError, ImportedTrack};
use crate::geometry::{GeoPoint, TrackPath};
use crate::tracks::{Track, TrackType};
use serde::{Deserialize, Serialize};

/// Current export format version.
pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackExport {
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub track_type: TrackType,
    pub laps: u32,
    pub snapped: bool,
    pub hash: String,
    pub points: Vec<GeoPoint>,
}

/// Build the export document for a track.
pub fn export_track(track: &Track) -> TrackExport {
    TrackExport {
        version: EXPORT_VERSION,
        name: track.name.clone(),
        description: track.description.clone(),
        track_type: track.track_type,
        laps: track.laps,
        snapped: track.snapped,
        hash: track.hash.clone(),
        points: track.path.points().to_vec(),
    }
}

impl TrackExport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Parse an export document, rejecting it when the hash does not match.
pub fn parse_export(content: &[u8]) -> Result<ImportedTrack, ImportError> {
    let export: TrackExport = serde_json::from_slice(content)
        .map_err(|e| ImportError::MalformedImport(format!("Export parse error: {}", e)))?;

    if export.version > EXPORT_VERSION {
        return Err(ImportError::MalformedImport(format!(
            "Export version {} is newer than supported version {}",
            export.version, EXPORT_VERSION
        )));
    }

    let path = TrackPath::new(export.points.clone())
        .map_err(|e| ImportError::MalformedImport(e.to_string()))?;
    let actual = path.content_hash();
    if actual != export.hash {
        return Err(ImportError::MalformedImport(format!(
            "Path hash mismatch: expected {}, computed {}",
            export.hash, actual
        )));
    }

    Ok(ImportedTrack {
        name: export.name,
        description: export.description,
        track_type: export.track_type,
        laps: export.laps.max(1),
        points: path.points().to_vec(),
        snapped: export.snapped,
    })
}

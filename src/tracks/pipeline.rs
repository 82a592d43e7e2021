//! Import, snap, verify and hash a track.
//!
//! Each stage can be called on its own. The full run is a pure function of
//! its input and the snapping response, so running it again over an
//! unchanged path gives the same hash and outcome.

use super::import::{self, ImportError, ImportedTrack};
use super::snap::{RoadSnapper, SnapError, SnapResponse};
use super::verify::{verify_path, VerificationOutcome};
use super::{Track, TrackType};
use crate::geometry::{GeoPoint, GeometryError, TrackPath};
use crate::storage::config::{SnappingSettings, TrackSettings};
use crate::storage::{Database, DatabaseError};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Pipeline errors. Snapping problems never show up here; they degrade.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Result of the snap stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapOutcome {
    Snapped {
        points: Vec<GeoPoint>,
        confidence: f64,
    },
    /// Geometry left as imported
    Unsnapped { reason: Option<String> },
}

/// Where an imported track was stored.
#[derive(Debug, Clone)]
pub enum SavedTrack {
    Created(Track),
    /// The same path was already stored; that track was re-verified
    Existing(Track),
}

impl SavedTrack {
    pub fn track(&self) -> &Track {
        match self {
            SavedTrack::Created(track) | SavedTrack::Existing(track) => track,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, SavedTrack::Created(_))
    }
}

pub struct TrackVerificationPipeline {
    tracks: TrackSettings,
    snapping: SnappingSettings,
    snapper: Option<Arc<dyn RoadSnapper>>,
}

impl TrackVerificationPipeline {
    pub fn new(tracks: TrackSettings, snapping: SnappingSettings) -> Self {
        Self {
            tracks,
            snapping,
            snapper: None,
        }
    }

    pub fn with_snapper(mut self, snapper: Arc<dyn RoadSnapper>) -> Self {
        self.snapper = Some(snapper);
        self
    }

    /// Stage 1: read a file from disk.
    pub fn import(&self, path: &Path) -> Result<ImportedTrack, ImportError> {
        import::import_file(path)
    }

    /// Stage 2: snap points to roads, degrading to the raw points on failure.
    pub async fn snap(&self, points: &[GeoPoint]) -> SnapOutcome {
        if !self.tracks.snap_to_roads {
            return SnapOutcome::Unsnapped { reason: None };
        }

        let Some(snapper) = &self.snapper else {
            tracing::warn!("Snap to roads is enabled but no snapping service is configured");
            return SnapOutcome::Unsnapped {
                reason: Some(SnapError::NotConfigured.to_string()),
            };
        };

        match snapper.snap(points).await {
            Ok(response) if response.points.len() != points.len() => SnapOutcome::Unsnapped {
                reason: Some(
                    SnapError::Malformed(format!(
                        "expected {} points, got {}",
                        points.len(),
                        response.points.len()
                    ))
                    .to_string(),
                ),
            },
            Ok(SnapResponse {
                warning: Some(warning), ..
            }) => {
                tracing::warn!("Snapping service warned, keeping raw geometry: {}", warning);
                SnapOutcome::Unsnapped {
                    reason: Some(format!("snap warning: {}", warning)),
                }
            }
            Ok(response) if response.confidence < self.snapping.min_confidence => {
                tracing::warn!(
                    "Snap confidence {:.2} below minimum {:.2}, keeping raw geometry",
                    response.confidence,
                    self.snapping.min_confidence
                );
                SnapOutcome::Unsnapped {
                    reason: Some(format!(
                        "snap confidence {:.2} below minimum {:.2}",
                        response.confidence, self.snapping.min_confidence
                    )),
                }
            }
            Ok(response) => SnapOutcome::Snapped {
                points: response.points,
                confidence: response.confidence,
            },
            Err(e) => {
                tracing::warn!("Snapping failed, keeping raw geometry: {}", e);
                SnapOutcome::Unsnapped {
                    reason: Some(e.to_string()),
                }
            }
        }
    }

    /// Stage 3: check the rules.
    pub fn verify(
        &self,
        path: &TrackPath,
        track_type: TrackType,
        laps: u32,
        other_starts: &[GeoPoint],
    ) -> VerificationOutcome {
        verify_path(path, track_type, laps, &self.tracks, other_starts)
    }

    /// Run snap, verify and hash over imported geometry.
    pub async fn run(
        &self,
        imported: ImportedTrack,
        owner_id: Uuid,
        other_starts: &[GeoPoint],
    ) -> Result<Track, PipelineError> {
        let mut track = self.build(imported, owner_id).await?;
        self.apply_verification(&mut track, other_starts);
        Ok(track)
    }

    /// Run the pipeline and store the outcome.
    ///
    /// A path already stored under the same hash is not saved twice. The
    /// stored track is re-verified against the other tracks instead, so
    /// importing the same file again gives the same outcome.
    pub async fn import_into(
        &self,
        db: &Database,
        imported: ImportedTrack,
        owner_id: Uuid,
    ) -> Result<SavedTrack, PipelineError> {
        let mut track = self.build(imported, owner_id).await?;

        if let Some(existing) = db.track_by_hash(&track.hash)? {
            tracing::info!("Track '{}' is already stored as {}", track.name, existing.id);
            let existing = self.reverify(&existing, &db.track_starts(Some(existing.id))?);
            db.save_track(&existing)?;
            return Ok(SavedTrack::Existing(existing));
        }

        self.apply_verification(&mut track, &db.track_starts(None)?);
        db.save_track(&track)?;
        Ok(SavedTrack::Created(track))
    }

    /// Snap and hash, leaving the track unverified.
    async fn build(&self, imported: ImportedTrack, owner_id: Uuid) -> Result<Track, PipelineError> {
        let (points, snapped, snap_failure) = if imported.snapped {
            (imported.points, true, None)
        } else {
            match self.snap(&imported.points).await {
                SnapOutcome::Snapped { points, .. } => (points, true, None),
                SnapOutcome::Unsnapped { reason } => (imported.points, false, reason),
            }
        };

        let path = TrackPath::new(points)?;
        let mut track = Track::new(owner_id, imported.name, imported.track_type, imported.laps, path);
        track.description = imported.description;
        track.snapped = snapped;
        track.snap_failure = snap_failure;
        Ok(track)
    }

    /// Re-run verification over a track's current path.
    ///
    /// The path is not touched, so the hash only changes if it was stale.
    pub fn reverify(&self, track: &Track, other_starts: &[GeoPoint]) -> Track {
        let mut track = track.clone();
        track.hash = track.path.content_hash();
        self.apply_verification(&mut track, other_starts);
        track
    }

    fn apply_verification(&self, track: &mut Track, other_starts: &[GeoPoint]) {
        let outcome = self.verify(&track.path, track.track_type, track.laps, other_starts);
        track.verified = outcome.verified;
        track.verification_failure = outcome.reason();

        if track.verified {
            tracing::info!(
                "Track '{}' verified ({:.0}m, hash {})",
                track.name,
                track.path.length(),
                &track.hash[..12]
            );
        } else {
            tracing::warn!(
                "Track '{}' failed verification: {}",
                track.name,
                track.verification_failure.as_deref().unwrap_or("unknown")
            );
        }
    }
}

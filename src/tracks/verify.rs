//! Geometric verification rules for track paths.

use super::TrackType;
use crate::geometry::{GeoPoint, TrackPath};
use crate::storage::config::TrackSettings;

/// Outcome of verifying a path.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub verified: bool,
    /// Every rule that failed, in check order
    pub failures: Vec<String>,
}

impl VerificationOutcome {
    /// Human-readable failure reason, if any.
    pub fn reason(&self) -> Option<String> {
        if self.failures.is_empty() {
            None
        } else {
            Some(self.failures.join("; "))
        }
    }
}

/// Check a path against the verification rules.
///
/// `other_starts` are the start points of tracks that already exist; a new
/// track may not start on top of one of them.
pub fn verify_path(
    path: &TrackPath,
    track_type: TrackType,
    laps: u32,
    settings: &TrackSettings,
    other_starts: &[GeoPoint],
) -> VerificationOutcome {
    let mut failures = Vec::new();
    let closed = track_type == TrackType::Circuit;

    let length = path.length();
    if length < settings.min_length_m {
        failures.push(format!(
            "track is {:.0}m long, minimum is {:.0}m",
            length, settings.min_length_m
        ));
    }

    let crossings = path.self_intersections(closed);
    if crossings > settings.max_self_intersections {
        failures.push(format!(
            "path crosses itself {} time(s), at most {} allowed",
            crossings, settings.max_self_intersections
        ));
    }

    if closed {
        let gap = path.origin().distance_to(path.end());
        if gap > settings.closure_tolerance_m {
            failures.push(format!(
                "circuit start and end are {:.0}m apart, at most {:.0}m allowed",
                gap, settings.closure_tolerance_m
            ));
        }
        if laps == 0 {
            failures.push("circuit must have at least one lap".to_string());
        }
    }

    if let Some(nearest) = other_starts
        .iter()
        .map(|s| s.distance_to(path.origin()))
        .filter(|d| *d < settings.min_start_separation_m)
        .reduce(f64::min)
    {
        failures.push(format!(
            "start is {:.0}m from another track's start, minimum separation is {:.0}m",
            nearest, settings.min_start_separation_m
        ));
    }

    VerificationOutcome {
        verified: failures.is_empty(),
        failures,
    }
}

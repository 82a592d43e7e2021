//! Track and position builders shared by the unit tests.

use chrono::{DateTime, Duration, Utc};
use hawkspeed::geometry::{GeoPoint, PositionFix, TrackPath, EARTH_RADIUS_M};
use hawkspeed::racing::StartRequest;
use hawkspeed::tracks::{Track, TrackType};
use std::sync::Arc;
use uuid::Uuid;

/// Meters covered by one degree along a meridian.
pub fn meters_per_degree() -> f64 {
    EARTH_RADIUS_M * std::f64::consts::PI / 180.0
}

/// A verified straight sprint heading north from (0, 0).
pub fn sprint_track(length_m: f64) -> Arc<Track> {
    let path = TrackPath::new(vec![
        GeoPoint::new(0.0, 0.0),
        GeoPoint::new(length_m / meters_per_degree(), 0.0),
    ])
    .unwrap();
    let mut track = Track::new(Uuid::new_v4(), "Straight".to_string(), TrackType::Sprint, 1, path);
    track.verified = true;
    Arc::new(track)
}

/// A verified square circuit: north, east, south, then west back home.
pub fn circuit_track(side_m: f64, laps: u32) -> Arc<Track> {
    let side = side_m / meters_per_degree();
    let path = TrackPath::new(vec![
        GeoPoint::new(0.0, 0.0),
        GeoPoint::new(side, 0.0),
        GeoPoint::new(side, side),
        GeoPoint::new(0.0, side),
        GeoPoint::new(0.0, 0.0),
    ])
    .unwrap();
    let mut track = Track::new(Uuid::new_v4(), "Block".to_string(), TrackType::Circuit, laps, path);
    track.verified = true;
    Arc::new(track)
}

pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// A fix `distance` meters along the track, wrapping on circuits.
pub fn fix_along(track: &Track, distance: f64, secs: i64) -> PositionFix {
    fix_beside(track, distance, 0.0, secs)
}

/// A fix `distance` along the track, pushed `east_m` meters east.
pub fn fix_beside(track: &Track, distance: f64, east_m: f64, secs: i64) -> PositionFix {
    let lap = if track.is_circuit() {
        distance.rem_euclid(track.lap_length())
    } else {
        distance
    };
    let p = track.path.point_at(lap);
    PositionFix {
        latitude: p.latitude,
        longitude: p.longitude + east_m / meters_per_degree(),
        bearing: track.path.bearing_at(lap),
        speed_ms: 20.0,
        logged_at: epoch() + Duration::seconds(secs),
    }
}

pub fn start_request(track: &Track) -> StartRequest {
    StartRequest {
        track_id: track.id,
        started: fix_along(track, 0.0, 0),
        countdown: None,
        fake: false,
    }
}

//! GPX parser for track import.

use super::{ImportError, ImportedTrack};
use crate::geometry::GeoPoint;
use crate::tracks::TrackType;

fn to_geo_point(point: &gpx::Waypoint) -> GeoPoint {
    GeoPoint {
        latitude: point.point().y(),
        longitude: point.point().x(),
        elevation: point.elevation,
    }
}

/// Parse GPX content into track geometry.
///
/// Points come from tracks, then routes, then loose waypoints. A `<type>`
/// of `circuit` on the first track or route marks the track as a circuit.
pub fn parse_gpx(content: &[u8]) -> Result<ImportedTrack, ImportError> {
    let content_str = std::str::from_utf8(content)
        .map_err(|e| ImportError::MalformedImport(format!("Invalid UTF-8: {}", e)))?;

    let gpx_data: gpx::Gpx = gpx::read(content_str.as_bytes())
        .map_err(|e| ImportError::MalformedImport(format!("GPX parse error: {}", e)))?;

    let mut points: Vec<GeoPoint> = gpx_data
        .tracks
        .iter()
        .flat_map(|t| t.segments.iter())
        .flat_map(|s| s.points.iter())
        .map(to_geo_point)
        .collect();

    if points.is_empty() {
        points = gpx_data
            .routes
            .iter()
            .flat_map(|r| r.points.iter())
            .map(to_geo_point)
            .collect();
    }

    if points.is_empty() {
        points = gpx_data.waypoints.iter().map(to_geo_point).collect();
    }

    if points.is_empty() {
        return Err(ImportError::MalformedImport(
            "No GPS points found in GPX file".to_string(),
        ));
    }

    let (name, description, kind) = if let Some(track) = gpx_data.tracks.first() {
        (track.name.clone(), track.description.clone(), track.type_.clone())
    } else if let Some(route) = gpx_data.routes.first() {
        (route.name.clone(), route.description.clone(), route.type_.clone())
    } else {
        (None, None, None)
    };

    let name = name
        .or_else(|| gpx_data.metadata.as_ref().and_then(|m| m.name.clone()))
        .unwrap_or_default();
    let description =
        description.or_else(|| gpx_data.metadata.as_ref().and_then(|m| m.description.clone()));
    let track_type = kind
        .as_deref()
        .and_then(TrackType::parse)
        .unwrap_or(TrackType::Sprint);

    Ok(ImportedTrack {
        name,
        description,
        track_type,
        laps: 1,
        points,
        snapped: false,
    })
}

//! Geographic primitives for race tracks.
//!
//! Distances are great-circle (haversine) metres; bearings are degrees
//! clockwise from true north in `[0, 360)`. Planar work such as projection
//! and intersection tests happens in a local equirectangular frame.

pub mod path;

pub use path::{PathProjection, TrackPath};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A single WGS84 coordinate, optionally with elevation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Elevation in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    /// True when both coordinates are finite and inside WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to another point in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Initial bearing from this point towards another.
    pub fn bearing_to(&self, other: &GeoPoint) -> f64 {
        initial_bearing(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Same horizontal position, ignoring elevation.
    pub fn same_position(&self, other: &GeoPoint) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }
}

/// A timestamped device position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Heading in degrees clockwise from north
    pub bearing: f64,
    /// Speed in meters per second
    pub speed_ms: f64,
    pub logged_at: DateTime<Utc>,
}

impl PositionFix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn is_valid(&self) -> bool {
        self.point().is_valid() && self.bearing.is_finite() && self.speed_ms.is_finite()
    }
}

/// A map area between two corners.
///
/// A box whose west edge is east of its east edge spans the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south_west: GeoPoint,
    pub north_east: GeoPoint,
}

impl BoundingBox {
    pub fn new(south_west: GeoPoint, north_east: GeoPoint) -> Result<Self, GeometryError> {
        if !south_west.is_valid() || !north_east.is_valid() {
            return Err(GeometryError::InvalidGeometry(
                "bounding box corner is not a valid coordinate".to_string(),
            ));
        }
        if south_west.latitude > north_east.latitude {
            return Err(GeometryError::InvalidGeometry(
                "bounding box south edge is north of its north edge".to_string(),
            ));
        }
        Ok(Self {
            south_west,
            north_east,
        })
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.south_west.longitude > self.north_east.longitude
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        let in_latitude = (self.south_west.latitude..=self.north_east.latitude).contains(&latitude);
        let in_longitude = if self.crosses_antimeridian() {
            longitude >= self.south_west.longitude || longitude <= self.north_east.longitude
        } else {
            (self.south_west.longitude..=self.north_east.longitude).contains(&longitude)
        };
        in_latitude && in_longitude
    }
}

/// Geometry errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
}

/// Calculate haversine distance between two GPS points in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Initial great-circle bearing from point 1 to point 2, in `[0, 360)`.
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let y = d_lon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lon.cos();

    normalize_bearing(y.atan2(x).to_degrees())
}

/// Wrap any angle in degrees into `[0, 360)`.
pub fn normalize_bearing(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Smallest absolute angle between two bearings, in `[0, 180]`.
pub fn bearing_difference(a: f64, b: f64) -> f64 {
    let diff = (normalize_bearing(a) - normalize_bearing(b)).abs();
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Equirectangular projection centred on an origin.
///
/// Accurate to well under a meter over the extent of a street race.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    origin_lat: f64,
    origin_lon: f64,
    cos_lat: f64,
}

impl LocalFrame {
    pub fn new(origin: &GeoPoint) -> Self {
        Self {
            origin_lat: origin.latitude,
            origin_lon: origin.longitude,
            cos_lat: origin.latitude.to_radians().cos(),
        }
    }

    /// Project to (east, north) meters relative to the origin.
    pub fn project(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let mut d_lon = longitude - self.origin_lon;
        if d_lon > 180.0 {
            d_lon -= 360.0;
        } else if d_lon < -180.0 {
            d_lon += 360.0;
        }
        let x = d_lon.to_radians() * EARTH_RADIUS_M * self.cos_lat;
        let y = (latitude - self.origin_lat).to_radians() * EARTH_RADIUS_M;
        (x, y)
    }

    /// Inverse of [`LocalFrame::project`].
    pub fn unproject(&self, x: f64, y: f64) -> GeoPoint {
        let latitude = self.origin_lat + (y / EARTH_RADIUS_M).to_degrees();
        let longitude = self.origin_lon + (x / (EARTH_RADIUS_M * self.cos_lat)).to_degrees();
        GeoPoint::new(latitude, longitude)
    }
}

/// Proper intersection test for segments `a1-a2` and `b1-b2` in the plane.
///
/// Touching endpoints and collinear overlap count as intersections.
pub fn segments_intersect(a1: (f64, f64), a2: (f64, f64), b1: (f64, f64), b2: (f64, f64)) -> bool {
    fn orient(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> f64 {
        (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
    }

    fn on_segment(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> bool {
        r.0 >= p.0.min(q.0) - 1e-9
            && r.0 <= p.0.max(q.0) + 1e-9
            && r.1 >= p.1.min(q.1) - 1e-9
            && r.1 <= p.1.max(q.1) + 1e-9
    }

    const EPS: f64 = 1e-9;
    let d1 = orient(b1, b2, a1);
    let d2 = orient(b1, b2, a2);
    let d3 = orient(a1, a2, b1);
    let d4 = orient(a1, a2, b2);

    if ((d1 > EPS && d2 < -EPS) || (d1 < -EPS && d2 > EPS))
        && ((d3 > EPS && d4 < -EPS) || (d3 < -EPS && d4 > EPS))
    {
        return true;
    }

    (d1.abs() <= EPS && on_segment(b1, b2, a1))
        || (d2.abs() <= EPS && on_segment(b1, b2, a2))
        || (d3.abs() <= EPS && on_segment(a1, a2, b1))
        || (d4.abs() <= EPS && on_segment(a1, a2, b2))
}

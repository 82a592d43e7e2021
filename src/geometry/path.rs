//! Ordered track paths with projection and bearing lookups.

use super::{segments_intersect, GeoPoint, GeometryError, LocalFrame};
use sha2::{Digest, Sha256};

/// Where a coordinate lands on a path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathProjection {
    /// Distance along the path from its origin to the nearest point (meters)
    pub path_distance: f64,
    /// Perpendicular distance from the coordinate to the path (meters)
    pub offset_m: f64,
    /// Index of the segment the nearest point lies on
    pub segment_index: usize,
}

/// An immutable, validated sequence of at least two distinct points.
#[derive(Debug, Clone)]
pub struct TrackPath {
    points: Vec<GeoPoint>,
    cumulative: Vec<f64>,
    local: Vec<(f64, f64)>,
    frame: LocalFrame,
}

impl PartialEq for TrackPath {
    fn eq(&self, other: &Self) -> bool {
        self.points == other.points
    }
}

impl TrackPath {
    /// Build a path, collapsing consecutive duplicate points.
    pub fn new(points: Vec<GeoPoint>) -> Result<Self, GeometryError> {
        if let Some((i, _)) = points.iter().enumerate().find(|(_, p)| !p.is_valid()) {
            return Err(GeometryError::InvalidGeometry(format!(
                "point {} has an invalid coordinate",
                i
            )));
        }

        let mut deduped: Vec<GeoPoint> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last() {
                Some(last) if last.same_position(&point) => {}
                _ => deduped.push(point),
            }
        }

        if deduped.len() < 2 {
            return Err(GeometryError::InvalidGeometry(
                "a path needs at least two distinct points".to_string(),
            ));
        }

        let frame = LocalFrame::new(&deduped[0]);
        let local = deduped
            .iter()
            .map(|p| frame.project(p.latitude, p.longitude))
            .collect();

        let mut cumulative = Vec::with_capacity(deduped.len());
        cumulative.push(0.0);
        for pair in deduped.windows(2) {
            let previous = cumulative.last().copied().unwrap_or(0.0);
            cumulative.push(previous + pair[0].distance_to(&pair[1]));
        }

        Ok(Self {
            points: deduped,
            cumulative,
            local,
            frame,
        })
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Total length in meters.
    pub fn length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    pub fn origin(&self) -> &GeoPoint {
        &self.points[0]
    }

    pub fn end(&self) -> &GeoPoint {
        &self.points[self.points.len() - 1]
    }

    /// Cumulative distance at each point.
    pub fn cumulative_distances(&self) -> &[f64] {
        &self.cumulative
    }

    /// Points in the path's local metric frame.
    pub fn local_points(&self) -> &[(f64, f64)] {
        &self.local
    }

    pub fn segment_count(&self) -> usize {
        self.points.len() - 1
    }

    /// Whether the last point lies within `tolerance_m` of the first.
    pub fn is_closed(&self, tolerance_m: f64) -> bool {
        self.origin().distance_to(self.end()) <= tolerance_m
    }

    /// Nearest point on the whole path.
    pub fn project(&self, latitude: f64, longitude: f64) -> PathProjection {
        let p = self.frame.project(latitude, longitude);
        let mut best: Option<PathProjection> = None;

        for i in 0..self.segment_count() {
            let candidate = self.project_onto_segment(i, p);
            if best.map_or(true, |b| candidate.offset_m < b.offset_m) {
                best = Some(candidate);
            }
        }

        best.unwrap_or(PathProjection {
            path_distance: 0.0,
            offset_m: f64::INFINITY,
            segment_index: 0,
        })
    }

    /// Nearest point among segments within `window_m` of `hint_distance`.
    ///
    /// On `circular` paths the window wraps across the origin. Ties go to the
    /// candidate closest to the hint, so a position following the path keeps
    /// a consistent distance where the path crosses itself.
    pub fn project_near(
        &self,
        latitude: f64,
        longitude: f64,
        hint_distance: f64,
        window_m: f64,
        circular: bool,
    ) -> PathProjection {
        let p = self.frame.project(latitude, longitude);
        let mut best: Option<(PathProjection, f64)> = None;

        for i in 0..self.segment_count() {
            let gap = self.gap_to_segment(i, hint_distance, circular);
            if gap > window_m {
                continue;
            }

            let candidate = self.project_onto_segment(i, p);
            let separation = self.separation(candidate.path_distance, hint_distance, circular);
            let better = match best {
                None => true,
                Some((b, b_sep)) => {
                    candidate.offset_m < b.offset_m - 1e-6
                        || ((candidate.offset_m - b.offset_m).abs() <= 1e-6 && separation < b_sep)
                }
            };
            if better {
                best = Some((candidate, separation));
            }
        }

        match best {
            Some((projection, _)) => projection,
            None => self.project(latitude, longitude),
        }
    }

    /// Bearing of the segment containing `distance`.
    pub fn bearing_at(&self, distance: f64) -> f64 {
        let i = self.segment_at(distance);
        self.points[i].bearing_to(&self.points[i + 1])
    }

    /// Heading required at the start line.
    pub fn start_bearing(&self) -> f64 {
        self.bearing_at(0.0)
    }

    /// Interpolated point `distance` meters along the path (clamped).
    pub fn point_at(&self, distance: f64) -> GeoPoint {
        let distance = distance.clamp(0.0, self.length());
        let i = self.segment_at(distance);
        let a = &self.points[i];
        let b = &self.points[i + 1];
        let span = self.cumulative[i + 1] - self.cumulative[i];
        let t = if span > 0.0 {
            ((distance - self.cumulative[i]) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut point = GeoPoint::new(
            a.latitude + (b.latitude - a.latitude) * t,
            a.longitude + (b.longitude - a.longitude) * t,
        );
        if let (Some(ea), Some(eb)) = (a.elevation, b.elevation) {
            point.elevation = Some(ea + (eb - ea) * t);
        }
        point
    }

    /// Count crossings between non-adjacent segments.
    ///
    /// With `closed` set, the first and last segments are also treated as
    /// adjacent since they meet at the start/finish line.
    pub fn self_intersections(&self, closed: bool) -> usize {
        let n = self.segment_count();
        let mut count = 0;

        for i in 0..n {
            for j in (i + 2)..n {
                if closed && i == 0 && j == n - 1 {
                    continue;
                }
                if segments_intersect(
                    self.local[i],
                    self.local[i + 1],
                    self.local[j],
                    self.local[j + 1],
                ) {
                    count += 1;
                }
            }
        }

        count
    }

    /// SHA-256 over the ordered points, hex encoded.
    ///
    /// Coordinates are normalised to 7 decimals and elevation to 0.1 m.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for point in &self.points {
            let elevation = point
                .elevation
                .map(|e| format!("{:.1}", e))
                .unwrap_or_else(|| "-".to_string());
            hasher.update(
                format!("{:.7},{:.7},{}\n", point.latitude, point.longitude, elevation).as_bytes(),
            );
        }
        hex::encode(hasher.finalize())
    }

    fn segment_at(&self, distance: f64) -> usize {
        let idx = self.cumulative.partition_point(|&c| c <= distance);
        idx.saturating_sub(1).min(self.segment_count() - 1)
    }

    fn project_onto_segment(&self, i: usize, p: (f64, f64)) -> PathProjection {
        let a = self.local[i];
        let b = self.local[i + 1];
        let ab = (b.0 - a.0, b.1 - a.1);
        let len_sq = ab.0 * ab.0 + ab.1 * ab.1;

        let t = if len_sq > 0.0 {
            (((p.0 - a.0) * ab.0 + (p.1 - a.1) * ab.1) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let q = (a.0 + ab.0 * t, a.1 + ab.1 * t);
        let offset_m = ((p.0 - q.0).powi(2) + (p.1 - q.1).powi(2)).sqrt();
        let span = self.cumulative[i + 1] - self.cumulative[i];

        PathProjection {
            path_distance: self.cumulative[i] + span * t,
            offset_m,
            segment_index: i,
        }
    }

    fn gap_to_segment(&self, i: usize, hint: f64, circular: bool) -> f64 {
        let start = self.cumulative[i];
        let end = self.cumulative[i + 1];
        let gap = |h: f64| {
            if h < start {
                start - h
            } else if h > end {
                h - end
            } else {
                0.0
            }
        };

        if circular {
            let length = self.length();
            gap(hint).min(gap(hint + length)).min(gap(hint - length))
        } else {
            gap(hint)
        }
    }

    fn separation(&self, a: f64, b: f64, circular: bool) -> f64 {
        let direct = (a - b).abs();
        if circular {
            direct.min(self.length() - direct)
        } else {
            direct
        }
    }
}

//! Road snapping service client.
//!
//! Speaks the Google Roads `snapToRoads` API: points go out as a
//! `lat,lng|lat,lng` path parameter in batches of at most 100, and come back
//! as `snappedPoints` carrying the `originalIndex` they replace.

use crate::geometry::GeoPoint;
use crate::storage::config::SnappingSettings;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Result of snapping a sequence of points.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapResponse {
    /// Same length and order as the input
    pub points: Vec<GeoPoint>,
    /// Fraction of input points matched to a road, 0.0 - 1.0
    pub confidence: f64,
    /// Service warnings, joined
    pub warning: Option<String>,
}

/// Road snapping failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapError {
    /// Network failure or server-side error; worth retrying
    #[error("Snapping service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request (4xx)
    #[error("Snapping request rejected: {0}")]
    Rejected(String),

    #[error("Malformed snapping response: {0}")]
    Malformed(String),

    #[error("Snapping service not configured")]
    NotConfigured,
}

impl SnapError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SnapError::Unavailable(_))
    }
}

/// A service that moves raw GPS points onto the road network.
#[async_trait]
pub trait RoadSnapper: Send + Sync {
    async fn snap(&self, points: &[GeoPoint]) -> Result<SnapResponse, SnapError>;
}

/// Google Roads API client.
pub struct GoogleRoadsSnapper {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl GoogleRoadsSnapper {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            batch_size: 100,
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Build from configuration; fails when no API key is set.
    pub fn from_settings(settings: &SnappingSettings) -> Result<Self, SnapError> {
        let api_key = settings.api_key.as_deref().ok_or(SnapError::NotConfigured)?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: settings.base_url.clone(),
            api_key: api_key.to_string(),
            batch_size: settings.batch_size.clamp(1, 100),
            max_retries: settings.max_retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        })
    }

    /// Encode one batch as a request URL.
    pub fn request_url(&self, batch: &[GeoPoint]) -> Result<reqwest::Url, SnapError> {
        reqwest::Url::parse_with_params(
            &self.base_url,
            &[("path", encode_path(batch)), ("key", self.api_key.clone())],
        )
        .map_err(|e| SnapError::Rejected(format!("Bad snapping URL: {}", e)))
    }

    async fn snap_batch(&self, batch_idx: usize, batch: &[GeoPoint]) -> Result<RoadsResponse, SnapError> {
        let url = self.request_url(batch)?;
        tracing::debug!("Requesting snap for batch #{} ({} points)", batch_idx + 1, batch.len());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SnapError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<RoadsResponse>()
                .await
                .map_err(|e| SnapError::Malformed(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<RoadsErrorBody>(&body)
            .map(|b| format!("{} {}: {}", b.error.code, b.error.status, b.error.message))
            .unwrap_or_else(|_| format!("API returned status: {}", status));

        if status.as_u16() == 429 || status.is_server_error() {
            Err(SnapError::Unavailable(message))
        } else {
            Err(SnapError::Rejected(message))
        }
    }

    async fn snap_batch_with_retry(
        &self,
        batch_idx: usize,
        batch: &[GeoPoint],
    ) -> Result<RoadsResponse, SnapError> {
        let mut attempt = 0;
        loop {
            match self.snap_batch(batch_idx, batch).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt);
                    tracing::warn!(
                        "Snap batch #{} failed ({}), retrying in {:?}",
                        batch_idx + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl RoadSnapper for GoogleRoadsSnapper {
    async fn snap(&self, points: &[GeoPoint]) -> Result<SnapResponse, SnapError> {
        let mut snapped = Vec::with_capacity(points.len());
        let mut matched = 0usize;
        let mut warnings = Vec::new();

        for (batch_idx, batch) in points.chunks(self.batch_size).enumerate() {
            let response = self.snap_batch_with_retry(batch_idx, batch).await?;
            if let Some(warning) = &response.warning_message {
                tracing::warn!("Snap batch #{} warning: {}", batch_idx + 1, warning);
                warnings.push(warning.clone());
            }
            let (merged, batch_matched) = merge_snapped(batch, &response.snapped_points);
            matched += batch_matched;
            snapped.extend(merged);
        }

        Ok(SnapResponse {
            confidence: if points.is_empty() {
                0.0
            } else {
                matched as f64 / points.len() as f64
            },
            points: snapped,
            warning: if warnings.is_empty() {
                None
            } else {
                Some(warnings.join("; "))
            },
        })
    }
}

/// `lat,lng|lat,lng|...`
pub fn encode_path(points: &[GeoPoint]) -> String {
    points
        .iter()
        .map(|p| format!("{},{}", p.latitude, p.longitude))
        .collect::<Vec<_>>()
        .join("|")
}

/// Replace each original point with its snapped counterpart.
///
/// Elevation is kept from the original. Returns the merged points and how
/// many were matched.
pub fn merge_snapped(original: &[GeoPoint], snapped: &[SnappedPoint]) -> (Vec<GeoPoint>, usize) {
    let mut merged = original.to_vec();
    let mut seen = vec![false; original.len()];

    for point in snapped {
        let Some(idx) = point.original_index else {
            continue;
        };
        if idx < merged.len() && !seen[idx] {
            merged[idx].latitude = point.location.latitude;
            merged[idx].longitude = point.location.longitude;
            seen[idx] = true;
        }
    }

    let matched = seen.iter().filter(|s| **s).count();
    (merged, matched)
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SnappedLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnappedPoint {
    pub location: SnappedLocation,
    #[serde(default)]
    pub original_index: Option<usize>,
    #[serde(default)]
    pub place_id: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoadsResponse {
    #[serde(default)]
    snapped_points: Vec<SnappedPoint>,
    #[serde(default)]
    warning_message: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RoadsErrorBody {
    error: RoadsError,
}

#[derive(Debug, serde::Deserialize)]
struct RoadsError {
    code: u16,
    message: String,
    status: String,
}

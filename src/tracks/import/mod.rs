//! Track import from GPX files and previously exported tracks.

pub mod export;
pub mod gpx;

pub use export::{export_track, parse_export, TrackExport};

use super::TrackType;
use crate::geometry::GeoPoint;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Raw geometry and metadata read from an import file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedTrack {
    pub name: String,
    pub description: Option<String>,
    pub track_type: TrackType,
    pub laps: u32,
    pub points: Vec<GeoPoint>,
    /// Geometry already went through road snapping
    pub snapped: bool,
}

/// Errors that can occur during track import
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Malformed import: {0}")]
    MalformedImport(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Import a single file, choosing the parser by extension.
pub fn import_file(path: &Path) -> Result<ImportedTrack, ImportError> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let content = std::fs::read(path)?;

    let mut imported = match extension.as_str() {
        "gpx" => gpx::parse_gpx(&content)?,
        "json" => parse_export(&content)?,
        other => return Err(ImportError::UnsupportedFormat(other.to_string())),
    };

    if imported.name.trim().is_empty() {
        imported.name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unnamed track")
            .to_string();
    }

    tracing::debug!(
        "Imported {} points from {}",
        imported.points.len(),
        path.display()
    );

    Ok(imported)
}

/// Import every `.gpx` and `.json` file in a directory, in name order.
///
/// Failures are reported per file; one bad file does not stop the rest.
pub fn import_directory(dir: &Path) -> Result<Vec<(PathBuf, Result<ImportedTrack, ImportError>)>, ImportError> {
    if !dir.is_dir() {
        return Err(ImportError::FileNotFound(dir.to_path_buf()));
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "gpx" | "json"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|p| {
            let result = import_file(&p);
            if let Err(e) = &result {
                tracing::warn!("Skipping {}: {}", p.display(), e);
            }
            (p, result)
        })
        .collect())
}

//! Storage module for the race database and server configuration.

pub mod config;
pub mod database;
pub mod schema;

pub use config::{ConfigError, Environment, ServerConfig};
pub use database::{Database, DatabaseError};

use crate::geometry::BoundingBox;
use crate::racing::attempt::{ProgressSnapshot, RaceAttempt, RaceResult};
use crate::tracks::{Track, TrackSummary};
use std::sync::Arc;
use uuid::Uuid;

/// Persistence used by live races.
///
/// Implementations must refuse a second ongoing attempt for the same user
/// and must refuse terminal writes to attempts that are no longer ongoing.
pub trait RaceStore: Send + Sync {
    /// A track by id, only if it is verified.
    fn load_verified_track(&self, track_id: Uuid) -> Result<Option<Track>, DatabaseError>;

    fn insert_attempt(&self, attempt: &RaceAttempt) -> Result<(), DatabaseError>;

    /// Best-effort progress checkpoint; ignored for non-ongoing attempts.
    fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<(), DatabaseError>;

    fn save_terminal_result(&self, result: &RaceResult) -> Result<(), DatabaseError>;

    /// Ids of every attempt still marked ongoing.
    fn find_ongoing_attempts(&self) -> Result<Vec<Uuid>, DatabaseError>;

    fn find_ongoing_attempt_for_user(&self, user_id: Uuid) -> Result<Option<RaceAttempt>, DatabaseError>;

    /// Finished attempts for a track, fake ones included.
    fn finished_attempts(&self, track_id: Uuid) -> Result<Vec<RaceAttempt>, DatabaseError>;

    fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<RaceAttempt>, DatabaseError>;

    /// Tracks whose start lies inside `bounds`, at most `limit` of them.
    fn tracks_in_bounds(&self, bounds: &BoundingBox, limit: usize) -> Result<Vec<TrackSummary>, DatabaseError>;
}

/// Run a store call on the blocking thread pool.
///
/// SQLite calls block, so async code must not make them on a runtime
/// worker thread.
pub async fn blocking<T, F>(store: &Arc<dyn RaceStore>, call: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&dyn RaceStore) -> Result<T, DatabaseError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(store.as_ref()))
        .await
        .map_err(|e| DatabaseError::QueryFailed(format!("storage task failed: {}", e)))?
}

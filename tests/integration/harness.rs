//! Test harness: an in-memory database, a registry and a coordinator.
//!
//! `FlakyStore` wraps the database and fails terminal writes on demand so
//! retry behavior can be exercised without a real outage. It can also make
//! the ongoing-attempt scan slow.

use chrono::{DateTime, Duration, Utc};
use hawkspeed::geometry::{BoundingBox, GeoPoint, PositionFix, TrackPath, EARTH_RADIUS_M};
use hawkspeed::racing::{ProgressSnapshot, ProgressWriter, RaceAttempt, RaceCoordinator, RaceResult, StartRequest};
use hawkspeed::session::{PlayerSession, SessionRegistry};
use hawkspeed::storage::{Database, DatabaseError, Environment, RaceStore, ServerConfig};
use hawkspeed::tracks::{Track, TrackSummary, TrackType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.environment = Environment::Test;
    config.storage.progress_flush_interval_ms = 10;
    config.storage.terminal_write_retries = 3;
    config.storage.terminal_retry_backoff_ms = 1;
    config
}

/// A verified 1km sprint north from `origin_lat`, saved to `db`.
pub fn saved_sprint(db: &Database, origin_lat: f64) -> Track {
    let degrees = 1000.0 / (EARTH_RADIUS_M * std::f64::consts::PI / 180.0);
    let path = TrackPath::new(vec![
        GeoPoint::new(origin_lat, 0.0),
        GeoPoint::new(origin_lat + degrees, 0.0),
    ])
    .unwrap();
    let mut track = Track::new(Uuid::new_v4(), "Test sprint".to_string(), TrackType::Sprint, 1, path);
    track.verified = true;
    db.save_track(&track).unwrap();
    track
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
}

pub fn fix_along(track: &Track, distance: f64, secs: i64) -> PositionFix {
    let p = track.path.point_at(distance);
    PositionFix {
        latitude: p.latitude,
        longitude: p.longitude,
        bearing: track.start_bearing,
        speed_ms: 25.0,
        logged_at: at(secs),
    }
}

pub fn start_request(track: &Track, secs: i64) -> StartRequest {
    StartRequest {
        track_id: track.id,
        started: fix_along(track, 0.0, secs),
        countdown: None,
        fake: false,
    }
}

pub struct Harness {
    pub db: Arc<Database>,
    pub registry: Arc<SessionRegistry>,
    pub coordinator: RaceCoordinator,
}

impl Harness {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Self::with_store(Arc::clone(&db), db, test_config())
    }

    pub fn with_store(db: Arc<Database>, store: Arc<dyn RaceStore>, config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(64));
        let (progress, _task) = ProgressWriter::spawn(
            Arc::clone(&store),
            std::time::Duration::from_millis(config.storage.progress_flush_interval_ms),
        );
        let coordinator = RaceCoordinator::new(store, Arc::clone(&registry), progress, Arc::new(config));
        Self {
            db,
            registry,
            coordinator,
        }
    }

    /// Register a connection for `user_id` and build its session.
    pub async fn connect(&self, user_id: Uuid) -> PlayerSession {
        let handle = self.registry.register(user_id).await;
        PlayerSession::new(handle.connection_id, user_id)
    }
}

/// Delegates to a database, failing the next `fail_terminal` terminal writes.
pub struct FlakyStore {
    pub inner: Arc<Database>,
    pub fail_terminal: AtomicUsize,
    pub terminal_calls: AtomicUsize,
    scan_delay: std::time::Duration,
}

impl FlakyStore {
    pub fn new(inner: Arc<Database>, failures: usize) -> Self {
        Self {
            inner,
            fail_terminal: AtomicUsize::new(failures),
            terminal_calls: AtomicUsize::new(0),
            scan_delay: std::time::Duration::ZERO,
        }
    }

    /// Block for `delay` on every ongoing-attempt scan.
    pub fn with_scan_delay(mut self, delay: std::time::Duration) -> Self {
        self.scan_delay = delay;
        self
    }
}

impl RaceStore for FlakyStore {
    fn load_verified_track(&self, track_id: Uuid) -> Result<Option<Track>, DatabaseError> {
        self.inner.load_verified_track(track_id)
    }

    fn insert_attempt(&self, attempt: &RaceAttempt) -> Result<(), DatabaseError> {
        self.inner.insert_attempt(attempt)
    }

    fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<(), DatabaseError> {
        self.inner.save_progress(snapshot)
    }

    fn save_terminal_result(&self, result: &RaceResult) -> Result<(), DatabaseError> {
        self.terminal_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_terminal.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_terminal.store(remaining - 1, Ordering::SeqCst);
            return Err(DatabaseError::QueryFailed("database is locked".to_string()));
        }
        self.inner.save_terminal_result(result)
    }

    fn find_ongoing_attempts(&self) -> Result<Vec<Uuid>, DatabaseError> {
        if !self.scan_delay.is_zero() {
            std::thread::sleep(self.scan_delay);
        }
        self.inner.find_ongoing_attempts()
    }

    fn find_ongoing_attempt_for_user(&self, user_id: Uuid) -> Result<Option<RaceAttempt>, DatabaseError> {
        self.inner.find_ongoing_attempt_for_user(user_id)
    }

    fn finished_attempts(&self, track_id: Uuid) -> Result<Vec<RaceAttempt>, DatabaseError> {
        self.inner.finished_attempts(track_id)
    }

    fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<RaceAttempt>, DatabaseError> {
        self.inner.get_attempt(attempt_id)
    }

    fn tracks_in_bounds(&self, bounds: &BoundingBox, limit: usize) -> Result<Vec<TrackSummary>, DatabaseError> {
        self.inner.tracks_in_bounds(bounds, limit)
    }
}

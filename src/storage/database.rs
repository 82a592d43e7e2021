//! Database operations using rusqlite.

use super::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use super::RaceStore;
use crate::geometry::{BoundingBox, GeoPoint, TrackPath};
use crate::racing::attempt::{ProgressSnapshot, RaceAttempt, RaceResult, RaceState};
use crate::tracks::{Track, TrackSummary, TrackType};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

const ATTEMPT_COLUMNS: &str = "id, track_id, user_id, state, reason, started_at, finished_at, \
     distance_m, percent_complete, percent_missed, laps_complete, average_speed_ms, \
     stopwatch_ms, finishing_place, fake";

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;

        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn
            .lock()
            .map_err(|_| DatabaseError::ConnectionFailed("connection lock poisoned".to_string()))
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn()?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        conn.execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        let current_version = Self::get_schema_version(&conn)?;

        if current_version < CURRENT_VERSION {
            Self::migrate(&conn, current_version)?;
        }

        Ok(())
    }

    /// Get the current schema version.
    fn get_schema_version(conn: &Connection) -> Result<i32, DatabaseError> {
        let result: SqliteResult<i32> = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Run database migrations.
    fn migrate(conn: &Connection, from_version: i32) -> Result<(), DatabaseError> {
        if from_version < 1 {
            conn.execute_batch(SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                [CURRENT_VERSION],
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            tracing::info!("Database migrated to version {}", CURRENT_VERSION);
        }

        Ok(())
    }

    // ========== Track Operations ==========

    /// Insert or update a track.
    ///
    /// Points are only rewritten when the path hash changed. Returns whether
    /// they were.
    pub fn save_track(&self, track: &Track) -> Result<bool, DatabaseError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let previous_hash: Option<String> = tx
            .query_row(
                "SELECT path_hash FROM tracks WHERE id = ?",
                [track.id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO tracks (id, owner_id, name, description, track_type, laps, verified,
                verification_failure, snapped, snap_failure, path_hash, start_bearing, length_m,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                track_type = excluded.track_type,
                laps = excluded.laps,
                verified = excluded.verified,
                verification_failure = excluded.verification_failure,
                snapped = excluded.snapped,
                snap_failure = excluded.snap_failure,
                path_hash = excluded.path_hash,
                start_bearing = excluded.start_bearing,
                length_m = excluded.length_m,
                updated_at = excluded.updated_at",
            params![
                track.id.to_string(),
                track.owner_id.to_string(),
                track.name,
                track.description,
                track.track_type.as_str(),
                track.laps,
                track.verified,
                track.verification_failure,
                track.snapped,
                track.snap_failure,
                track.hash,
                track.start_bearing,
                track.path.length(),
                track.created_at.to_rfc3339(),
                now,
            ],
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let path_changed = previous_hash.as_deref() != Some(track.hash.as_str());
        if path_changed {
            tx.execute(
                "DELETE FROM track_points WHERE track_id = ?",
                [track.id.to_string()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO track_points (track_id, seq, latitude, longitude, elevation)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

                for (seq, point) in track.path.points().iter().enumerate() {
                    stmt.execute(params![
                        track.id.to_string(),
                        seq as i64,
                        point.latitude,
                        point.longitude,
                        point.elevation,
                    ])
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
                }
            }

            if previous_hash.is_some() {
                tracing::info!("Path for track {} changed, points replaced", track.id);
            }
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(path_changed)
    }

    /// Load a track with its path.
    pub fn load_track(&self, track_id: Uuid) -> Result<Option<Track>, DatabaseError> {
        let conn = self.conn()?;
        Self::load_track_with(&conn, track_id)
    }

    fn load_track_with(conn: &Connection, track_id: Uuid) -> Result<Option<Track>, DatabaseError> {
        let row = conn
            .query_row(
                "SELECT id, owner_id, name, description, track_type, laps, verified,
                        verification_failure, snapped, snap_failure, path_hash, start_bearing,
                        created_at
                 FROM tracks WHERE id = ? AND deleted_at IS NULL",
                [track_id.to_string()],
                |row| {
                    Ok(TrackRow {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        name: row.get(2)?,
                        description: row.get(3)?,
                        track_type: row.get(4)?,
                        laps: row.get(5)?,
                        verified: row.get(6)?,
                        verification_failure: row.get(7)?,
                        snapped: row.get(8)?,
                        snap_failure: row.get(9)?,
                        path_hash: row.get(10)?,
                        start_bearing: row.get(11)?,
                        created_at: row.get(12)?,
                    })
                },
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare(
                "SELECT latitude, longitude, elevation FROM track_points
                 WHERE track_id = ? ORDER BY seq",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let points = stmt
            .query_map([track_id.to_string()], |row| {
                Ok(GeoPoint {
                    latitude: row.get(0)?,
                    longitude: row.get(1)?,
                    elevation: row.get(2)?,
                })
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        row.into_track(points).map(Some)
    }

    /// The live track stored with this path hash, if any.
    pub fn track_by_hash(&self, hash: &str) -> Result<Option<Track>, DatabaseError> {
        let conn = self.conn()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM tracks WHERE path_hash = ? AND deleted_at IS NULL
                 ORDER BY created_at LIMIT 1",
                [hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        match id {
            Some(id) => Self::load_track_with(&conn, parse_uuid(&id)?),
            None => Ok(None),
        }
    }

    /// Start points of every track except `exclude`.
    pub fn track_starts(&self, exclude: Option<Uuid>) -> Result<Vec<GeoPoint>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT p.track_id, p.latitude, p.longitude, p.elevation
                 FROM track_points p JOIN tracks t ON t.id = p.track_id
                 WHERE p.seq = 0 AND t.deleted_at IS NULL",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    GeoPoint {
                        latitude: row.get(1)?,
                        longitude: row.get(2)?,
                        elevation: row.get(3)?,
                    },
                ))
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let exclude = exclude.map(|id| id.to_string());
        let mut starts = Vec::new();
        for row in rows {
            let (track_id, point) = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            if exclude.as_deref() != Some(track_id.as_str()) {
                starts.push(point);
            }
        }
        Ok(starts)
    }

    /// Ids and names of all tracks, newest first.
    pub fn list_tracks(&self) -> Result<Vec<(Uuid, String, bool)>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, verified FROM tracks WHERE deleted_at IS NULL
                 ORDER BY created_at DESC",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut tracks = Vec::new();
        for row in rows {
            let (id, name, verified) = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            tracks.push((parse_uuid(&id)?, name, verified));
        }
        Ok(tracks)
    }

    /// Delete a track.
    ///
    /// A track nobody has raced is removed with its points. One with race
    /// history is only marked deleted, so its attempts and leaderboard stay
    /// intact and a race still running on it can record its result.
    pub fn delete_track(&self, track_id: Uuid) -> Result<(), DatabaseError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        let id = track_id.to_string();

        let attempts: i64 = tx
            .query_row("SELECT COUNT(*) FROM race_attempts WHERE track_id = ?", [&id], |row| {
                row.get(0)
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = if attempts == 0 {
            tx.execute("DELETE FROM tracks WHERE id = ? AND deleted_at IS NULL", [&id])
        } else {
            tx.execute(
                "UPDATE tracks SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![Utc::now().to_rfc3339(), id],
            )
        }
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if rows == 0 {
            return Err(DatabaseError::NotFound(format!("Track {}", track_id)));
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        if attempts > 0 {
            tracing::info!("Track {} has {} attempt(s), marked deleted", track_id, attempts);
        }
        Ok(())
    }

    // ========== Attempt Queries ==========

    /// Whether the user has a finished attempt on the track.
    pub fn has_user_finished(&self, track_id: Uuid, user_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM race_attempts
                           WHERE track_id = ? AND user_id = ? AND state = 'finished')",
            [track_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    fn query_attempts(
        conn: &Connection,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<RaceAttempt>, DatabaseError> {
        let sql = format!("SELECT {} FROM race_attempts WHERE {}", ATTEMPT_COLUMNS, where_clause);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params, AttemptRow::from_row)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut attempts = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            attempts.push(row.into_attempt()?);
        }
        Ok(attempts)
    }
}

impl RaceStore for Database {
    fn load_verified_track(&self, track_id: Uuid) -> Result<Option<Track>, DatabaseError> {
        Ok(self.load_track(track_id)?.filter(|t| t.verified))
    }

    fn insert_attempt(&self, attempt: &RaceAttempt) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO race_attempts (id, track_id, user_id, state, started_at, fake, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                attempt.id.to_string(),
                attempt.track_id.to_string(),
                attempt.user_id.to_string(),
                attempt.state.as_str(),
                attempt.started_at.to_rfc3339(),
                attempt.fake,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                DatabaseError::NotFound(format!("Track {}", attempt.track_id))
            }
            rusqlite::Error::SqliteFailure(err, _)
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                DatabaseError::ConstraintViolation(format!(
                    "user {} already has an ongoing attempt",
                    attempt.user_id
                ))
            }
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DatabaseError::ConstraintViolation(msg.unwrap_or_else(|| err.to_string()))
            }
            other => DatabaseError::QueryFailed(other.to_string()),
        })?;

        Ok(())
    }

    fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE race_attempts SET distance_m = ?1, percent_complete = ?2, percent_missed = ?3,
                laps_complete = ?4, average_speed_ms = ?5, stopwatch_ms = ?6, updated_at = ?7
             WHERE id = ?8 AND state = 'ongoing'",
            params![
                snapshot.distance_m,
                snapshot.percent_complete,
                snapshot.percent_missed,
                snapshot.laps_complete,
                snapshot.average_speed_ms,
                snapshot.stopwatch_ms as i64,
                snapshot.recorded_at.to_rfc3339(),
                snapshot.attempt_id.to_string(),
            ],
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    fn save_terminal_result(&self, result: &RaceResult) -> Result<(), DatabaseError> {
        if !result.state.is_terminal() {
            return Err(DatabaseError::ConstraintViolation(format!(
                "{} is not a terminal state",
                result.state
            )));
        }

        let conn = self.conn()?;
        let finished_at = (result.state == RaceState::Finished).then(|| result.ended_at.to_rfc3339());
        let rows = conn
            .execute(
                "UPDATE race_attempts SET state = ?1, reason = ?2, distance_m = ?3,
                    percent_complete = ?4, percent_missed = ?5, laps_complete = ?6,
                    average_speed_ms = ?7, stopwatch_ms = ?8, finishing_place = ?9,
                    finished_at = ?10, updated_at = ?11
                 WHERE id = ?12 AND state = 'ongoing'",
                params![
                    result.state.as_str(),
                    result.reason,
                    result.distance_m,
                    result.percent_complete,
                    result.percent_missed,
                    result.laps_complete,
                    result.average_speed_ms,
                    result.stopwatch_ms as i64,
                    result.finishing_place,
                    finished_at,
                    result.ended_at.to_rfc3339(),
                    result.attempt_id.to_string(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if rows == 0 {
            return Err(DatabaseError::ConstraintViolation(format!(
                "attempt {} is not ongoing",
                result.attempt_id
            )));
        }

        Ok(())
    }

    fn find_ongoing_attempts(&self) -> Result<Vec<Uuid>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id FROM race_attempts WHERE state = 'ongoing'")
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        ids.iter().map(|id| parse_uuid(id)).collect()
    }

    fn find_ongoing_attempt_for_user(&self, user_id: Uuid) -> Result<Option<RaceAttempt>, DatabaseError> {
        let conn = self.conn()?;
        let user = user_id.to_string();
        Ok(Self::query_attempts(&conn, "user_id = ? AND state = 'ongoing'", &[&user])?
            .into_iter()
            .next())
    }

    fn finished_attempts(&self, track_id: Uuid) -> Result<Vec<RaceAttempt>, DatabaseError> {
        let conn = self.conn()?;
        let track = track_id.to_string();
        Self::query_attempts(&conn, "track_id = ? AND state = 'finished'", &[&track])
    }

    fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<RaceAttempt>, DatabaseError> {
        let conn = self.conn()?;
        let id = attempt_id.to_string();
        Ok(Self::query_attempts(&conn, "id = ?", &[&id])?.into_iter().next())
    }

    fn tracks_in_bounds(&self, bounds: &BoundingBox, limit: usize) -> Result<Vec<TrackSummary>, DatabaseError> {
        let longitude_clause = if bounds.crosses_antimeridian() {
            "(p.longitude >= ?3 OR p.longitude <= ?4)"
        } else {
            "p.longitude BETWEEN ?3 AND ?4"
        };
        let sql = format!(
            "SELECT t.id, t.name, t.description, t.track_type, t.laps, t.start_bearing, t.length_m,
                    t.verified, p.latitude, p.longitude, p.elevation
             FROM tracks t JOIN track_points p ON p.track_id = t.id AND p.seq = 0
             WHERE t.deleted_at IS NULL AND p.latitude BETWEEN ?1 AND ?2 AND {}
             ORDER BY t.verified DESC, t.name
             LIMIT ?5",
            longitude_clause
        );

        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![
                    bounds.south_west.latitude,
                    bounds.north_east.latitude,
                    bounds.south_west.longitude,
                    bounds.north_east.longitude,
                    limit as i64,
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, bool>(7)?,
                        GeoPoint {
                            latitude: row.get(8)?,
                            longitude: row.get(9)?,
                            elevation: row.get(10)?,
                        },
                    ))
                },
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, name, description, track_type, laps, start_bearing, length_m, verified, start) =
                row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            summaries.push(TrackSummary {
                id: parse_uuid(&id)?,
                name,
                description,
                track_type: TrackType::parse(&track_type).ok_or_else(|| {
                    DatabaseError::CorruptRecord(format!("unknown track type '{}'", track_type))
                })?,
                laps,
                start,
                start_bearing,
                length_m,
                verified,
            });
        }
        Ok(summaries)
    }
}

struct TrackRow {
    id: String,
    owner_id: String,
    name: String,
    description: Option<String>,
    track_type: String,
    laps: u32,
    verified: bool,
    verification_failure: Option<String>,
    snapped: bool,
    snap_failure: Option<String>,
    path_hash: String,
    start_bearing: f64,
    created_at: String,
}

impl TrackRow {
    fn into_track(self, points: Vec<GeoPoint>) -> Result<Track, DatabaseError> {
        let path = TrackPath::new(points)
            .map_err(|e| DatabaseError::CorruptRecord(format!("track {}: {}", self.id, e)))?;

        if path.content_hash() != self.path_hash {
            tracing::warn!("Stored hash for track {} does not match its points", self.id);
        }

        Ok(Track {
            id: parse_uuid(&self.id)?,
            owner_id: parse_uuid(&self.owner_id)?,
            name: self.name,
            description: self.description,
            track_type: TrackType::parse(&self.track_type).ok_or_else(|| {
                DatabaseError::CorruptRecord(format!("unknown track type '{}'", self.track_type))
            })?,
            laps: self.laps,
            verified: self.verified,
            verification_failure: self.verification_failure,
            snapped: self.snapped,
            snap_failure: self.snap_failure,
            hash: self.path_hash,
            start_bearing: self.start_bearing,
            created_at: parse_datetime(&self.created_at)?,
            path,
        })
    }
}

struct AttemptRow {
    id: String,
    track_id: String,
    user_id: String,
    state: String,
    reason: Option<String>,
    started_at: String,
    finished_at: Option<String>,
    distance_m: f64,
    percent_complete: f64,
    percent_missed: f64,
    laps_complete: u32,
    average_speed_ms: f64,
    stopwatch_ms: Option<i64>,
    finishing_place: Option<u32>,
    fake: bool,
}

impl AttemptRow {
    fn from_row(row: &rusqlite::Row<'_>) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            track_id: row.get(1)?,
            user_id: row.get(2)?,
            state: row.get(3)?,
            reason: row.get(4)?,
            started_at: row.get(5)?,
            finished_at: row.get(6)?,
            distance_m: row.get(7)?,
            percent_complete: row.get(8)?,
            percent_missed: row.get(9)?,
            laps_complete: row.get(10)?,
            average_speed_ms: row.get(11)?,
            stopwatch_ms: row.get(12)?,
            finishing_place: row.get(13)?,
            fake: row.get(14)?,
        })
    }

    fn into_attempt(self) -> Result<RaceAttempt, DatabaseError> {
        Ok(RaceAttempt {
            id: parse_uuid(&self.id)?,
            track_id: parse_uuid(&self.track_id)?,
            user_id: parse_uuid(&self.user_id)?,
            started_at: parse_datetime(&self.started_at)?,
            state: RaceState::parse(&self.state).ok_or_else(|| {
                DatabaseError::CorruptRecord(format!("unknown race state '{}'", self.state))
            })?,
            reason: self.reason,
            distance_m: self.distance_m,
            percent_complete: self.percent_complete,
            percent_missed: self.percent_missed,
            laps_complete: self.laps_complete,
            average_speed_ms: self.average_speed_ms,
            stopwatch_ms: self.stopwatch_ms.map(|ms| ms.max(0) as u64),
            finishing_place: self.finishing_place,
            finished_at: self.finished_at.as_deref().map(parse_datetime).transpose()?,
            fake: self.fake,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::CorruptRecord(format!("bad id '{}': {}", s, e)))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRecord(format!("bad timestamp '{}': {}", s, e)))
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

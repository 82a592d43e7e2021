//! Database schema definitions for HawkSpeed.

/// SQL schema for creating all database tables.
pub const SCHEMA: &str = r#"
-- Tracks table
CREATE TABLE IF NOT EXISTS tracks (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    track_type TEXT NOT NULL DEFAULT 'sprint',
    laps INTEGER NOT NULL DEFAULT 1,
    verified INTEGER NOT NULL DEFAULT 0,
    verification_failure TEXT,
    snapped INTEGER NOT NULL DEFAULT 0,
    snap_failure TEXT,
    path_hash TEXT NOT NULL,
    start_bearing REAL NOT NULL,
    length_m REAL NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    -- Set when a track with race history is deleted
    deleted_at TEXT
);

-- Ordered path points, one row per point
CREATE TABLE IF NOT EXISTS track_points (
    track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    elevation REAL,
    PRIMARY KEY (track_id, seq)
);

-- Race attempts (one per start); history outlives its track
CREATE TABLE IF NOT EXISTS race_attempts (
    id TEXT PRIMARY KEY,
    track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE RESTRICT,
    user_id TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'ongoing',
    reason TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    distance_m REAL NOT NULL DEFAULT 0,
    percent_complete REAL NOT NULL DEFAULT 0,
    percent_missed REAL NOT NULL DEFAULT 0,
    laps_complete INTEGER NOT NULL DEFAULT 0,
    average_speed_ms REAL NOT NULL DEFAULT 0,
    stopwatch_ms INTEGER,
    finishing_place INTEGER,
    fake INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

-- At most one ongoing attempt per user
CREATE UNIQUE INDEX IF NOT EXISTS idx_race_attempts_one_ongoing
    ON race_attempts(user_id) WHERE state = 'ongoing';

CREATE INDEX IF NOT EXISTS idx_race_attempts_track_state ON race_attempts(track_id, state);
CREATE INDEX IF NOT EXISTS idx_tracks_verified ON tracks(verified);
CREATE INDEX IF NOT EXISTS idx_tracks_path_hash ON tracks(path_hash);
CREATE INDEX IF NOT EXISTS idx_track_points_start ON track_points(seq, latitude, longitude);
"#;

/// Schema version table
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;

//! Server configuration.
//!
//! Loaded from TOML. Every section falls back to defaults so a partial (or
//! missing) file is always usable.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Deployment environment.
///
/// Decides whether attempts flagged as fake count towards finishing places
/// and leaderboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    LiveDevelopment,
    #[default]
    Development,
    Test,
}

impl Environment {
    /// Fake attempts are only ranked outside the live environments.
    pub fn includes_fake_attempts(&self) -> bool {
        !matches!(self, Environment::Production | Environment::LiveDevelopment)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Production => write!(f, "Production"),
            Environment::LiveDevelopment => write!(f, "LiveDevelopment"),
            Environment::Development => write!(f, "Development"),
            Environment::Test => write!(f, "Test"),
        }
    }
}

/// Socket server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the WebSocket listener binds to
    pub bind_address: String,
    /// Seconds without any frame before a connection is dropped
    pub idle_timeout_secs: u64,
    /// Seconds between stuck-attempt recovery sweeps
    pub recovery_interval_secs: u64,
    /// Outbound messages buffered per connection
    pub outbound_buffer: usize,
    /// Spectator broadcast channel capacity
    pub spectator_buffer: usize,
    /// Most tracks returned for one viewport
    pub viewport_track_limit: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8765".to_string(),
            idle_timeout_secs: 120,
            recovery_interval_secs: 300,
            outbound_buffer: 64,
            spectator_buffer: 256,
            viewport_track_limit: 100,
        }
    }
}

/// Live race scoring thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceSettings {
    /// Allowed deviation from the track's start bearing
    pub start_bearing_tolerance_deg: f64,
    /// Maximum distance from the track origin when starting
    pub start_proximity_m: f64,
    /// Maximum movement between countdown and start (false start)
    pub max_countdown_creep_m: f64,
    /// Perpendicular distance from the path considered off-track
    pub off_track_tolerance_m: f64,
    /// How long a player may stay off-track before disqualification
    pub off_track_grace_secs: f64,
    /// Backwards movement ignored as GPS noise
    pub progress_noise_m: f64,
    /// Percent of the race distance that may be missed, driven backwards or skipped
    pub max_percent_missed: f64,
    /// Fastest plausible travel along the path between two fixes
    pub max_speed_ms: f64,
    /// Distance from the end (and start/finish point) that counts as finished
    pub finish_tolerance_m: f64,
    /// Search window around the last progress when projecting a position
    pub projection_window_m: f64,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            start_bearing_tolerance_deg: 45.0,
            start_proximity_m: 20.0,
            max_countdown_creep_m: 15.0,
            off_track_tolerance_m: 50.0,
            off_track_grace_secs: 10.0,
            progress_noise_m: 10.0,
            max_percent_missed: 7.0,
            max_speed_ms: 70.0,
            finish_tolerance_m: 20.0,
            projection_window_m: 250.0,
        }
    }
}

/// Track verification rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackSettings {
    /// Run imported geometry through the road snapping service
    pub snap_to_roads: bool,
    /// Shortest acceptable track
    pub min_length_m: f64,
    /// Non-adjacent segment crossings allowed (figure-eight tracks need 1)
    pub max_self_intersections: usize,
    /// Maximum start/end gap for a circuit
    pub closure_tolerance_m: f64,
    /// Minimum distance between the starts of two different tracks
    pub min_start_separation_m: f64,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            snap_to_roads: false,
            min_length_m: 200.0,
            max_self_intersections: 0,
            closure_tolerance_m: 30.0,
            min_start_separation_m: 20.0,
        }
    }
}

/// Road snapping service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnappingSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Points per request
    pub batch_size: usize,
    /// Fraction of points that must be matched to a road
    pub min_confidence: f64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SnappingSettings {
    fn default() -> Self {
        Self {
            base_url: "https://roads.googleapis.com/v1/snapToRoads".to_string(),
            api_key: None,
            batch_size: 100,
            min_confidence: 0.8,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite file; defaults to the platform data directory
    pub database_path: Option<PathBuf>,
    /// How often buffered race progress is flushed
    pub progress_flush_interval_ms: u64,
    /// Attempts at writing a terminal race result
    pub terminal_write_retries: u32,
    pub terminal_retry_backoff_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: None,
            progress_flush_interval_ms: 1000,
            terminal_write_retries: 3,
            terminal_retry_backoff_ms: 100,
        }
    }
}

/// Leaderboard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardSettings {
    pub page_size: usize,
}

impl Default for LeaderboardSettings {
    fn default() -> Self {
        Self { page_size: 20 }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub environment: Environment,
    pub server: ServerSettings,
    pub race: RaceSettings,
    pub tracks: TrackSettings,
    pub snapping: SnappingSettings,
    pub storage: StorageSettings,
    pub leaderboard: LeaderboardSettings,
}

impl ServerConfig {
    /// Database file, falling back to the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| get_data_dir().join("hawkspeed.db"))
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("app", "hawkspeed", "HawkSpeed")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".hawkspeed"))
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    directories::ProjectDirs::from("app", "hawkspeed", "HawkSpeed")
        .map(|dirs| dirs.config_dir().join("server.toml"))
        .unwrap_or_else(|| PathBuf::from(".hawkspeed/server.toml"))
}

/// Load configuration from `path`, or the default location.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    if !path.exists() {
        tracing::info!("No config at {}, using defaults", path.display());
        return Ok(ServerConfig::default());
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    parse_config(&content)
}

/// Parse configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to `path`.
pub fn save_config(config: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.snapping.batch_size == 0 || self.snapping.batch_size > 100 {
            return Err(ConfigError::Invalid(
                "snapping.batch_size must be between 1 and 100".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.snapping.min_confidence) {
            return Err(ConfigError::Invalid(
                "snapping.min_confidence must be between 0 and 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.race.max_percent_missed) {
            return Err(ConfigError::Invalid(
                "race.max_percent_missed must be a percentage".to_string(),
            ));
        }
        if self.race.max_speed_ms <= 0.0 {
            return Err(ConfigError::Invalid("race.max_speed_ms must be positive".to_string()));
        }
        if self.race.projection_window_m <= 0.0 {
            return Err(ConfigError::Invalid(
                "race.projection_window_m must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

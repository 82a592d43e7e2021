//! HawkSpeed - GPS Street Racing Server
//!
//! Live race sessions over WebSocket: players stream GPS fixes, the server
//! scores each ongoing attempt against a verified track and persists the
//! outcome. Tracks are imported from GPX or JSON exports, optionally snapped
//! to roads, and verified before anyone can race them.

pub mod geometry;
pub mod networking;
pub mod racing;
pub mod session;
pub mod storage;
pub mod tracks;

// Re-export commonly used types
pub use geometry::{BoundingBox, GeoPoint, PositionFix, TrackPath};
pub use networking::RaceServer;
pub use racing::{RaceCoordinator, RaceProgressEngine};
pub use session::{PlayerSession, SessionRegistry};
pub use storage::{Database, ServerConfig};
pub use tracks::{Track, TrackSummary, TrackType, TrackVerificationPipeline};

//! Networking module for live race sessions
//!
//! Players connect over WebSocket, join with their user id, then stream
//! position updates. Race events and spectator updates flow back on the
//! same connection.

pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use protocol::{ClientMessage, PlayerUpdate, ProtocolError, ServerMessage, PROTOCOL_VERSION};
pub use server::{decode_frame, Encoding, RaceServer};

//! Player sessions and the registry that tracks them.

pub mod player;
pub mod registry;

pub use player::{ConnectionStatus, PlayerSession, SessionSnapshot};
pub use registry::{InvalidationReason, RecoveryReport, SessionHandle, SessionInfo, SessionRegistry};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Session errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Stale update logged at {at}, last accepted {last}")]
    StaleUpdate {
        at: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("Already attached to attempt {0}")]
    AlreadyAttached(Uuid),

    #[error("Connection {0} is not registered")]
    NotRegistered(Uuid),

    #[error("Position is not a valid coordinate")]
    InvalidPosition,
}

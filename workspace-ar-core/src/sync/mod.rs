//! Sync Engine
//!
//! Keeps the placed-object set, alignment points and live drags consistent
//! between the host and its clients.

mod coordinator;
mod drag;
mod protocol;
mod state;
mod store;

pub use coordinator::*;
pub use drag::*;
pub use protocol::*;
pub use state::*;
pub use store::*;

use std::time::Duration;
use thiserror::Error;

/// Default period of the drag preview broadcast (10 Hz)
pub const DEFAULT_DRAG_TICK: Duration = Duration::from_millis(100);

/// Errors surfaced by sync operations the caller asked for.
///
/// Problems with inbound traffic are never reported here; those messages
/// are dropped and logged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("A drag is already in progress for {0}")]
    DragInProgress(ObjectId),

    #[error("Role already assigned: {0:?}")]
    RoleAlreadyAssigned(Role),

    #[error("Unknown object: {0}")]
    UnknownObject(ObjectId),
}

/// Sync engine tuning
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period of the drag preview broadcast
    pub drag_tick_interval: Duration,
    /// Inbound blobs larger than this are dropped
    pub max_message_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drag_tick_interval: DEFAULT_DRAG_TICK,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

//! WorkspaceAR - Core Library
//!
//! This library keeps placed AR objects, alignment points and live drags
//! in sync across devices sharing a session over P2P networking.

pub mod ffi;
pub mod network;
pub mod sync;

// Re-exports for convenience
pub use sync::{ObjectRecord, SyncCoordinator, WireMessage};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();

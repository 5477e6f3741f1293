//! Task Board Sync - synchronization engine for a three-list task board
//!
//! This library keeps a locally cached view of the Backlog, In-Progress and
//! Done lists in step with a remote document store, runs cross-list moves as
//! atomic remote transactions and overlays speculative moves on top of the
//! confirmed state so the board reacts before the network does.

/// Board view model and presentation-facing surface
pub mod board;
/// Per-list confirmed snapshot cache
pub mod cache;
/// Configuration management
pub mod config;
/// Write path: create, update, delete and move
pub mod coordinator;
/// Demo session driven by the binary
pub mod demo;
/// Speculative move overlay
pub mod overlay;
/// Remote store adapter and its in-memory implementation
pub mod store;
/// Task and list definitions
pub mod task;

pub use board::{BoardView, BoardViewModel};
pub use config::BoardConfig;
pub use coordinator::MutationCoordinator;
pub use store::memory::MemoryStore;
pub use store::{RemoteStore, Snapshot, StoreError};
pub use task::{ListId, Task, TaskFields, TaskPatch};

use thiserror::Error;

/// Result type for board operations
pub type Result<T> = std::result::Result<T, BoardError>;

/// Error types for the task board
#[derive(Error, Debug)]
pub enum BoardError {
    /// Input rejected before any network call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Remote store operation failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Document could not be converted to or from a task
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Teardown did not finish in time
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl BoardError {
    /// The store error behind this failure, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            BoardError::Store(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the remote reported the document as already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, BoardError::Store(StoreError::NotFound(_)))
    }
}

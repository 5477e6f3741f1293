//! Remote store adapter

/// In-memory store implementation
pub mod memory;
/// Cancellable change feed
pub mod subscription;

pub use subscription::{Subscription, SubscriptionHandle};

use crate::task::{ListId, Task, TaskFields, TaskPatch};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for remote store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures reported by the remote store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network or service unavailable; transient
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Caller is not allowed to touch the collection
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Document does not exist in the given list
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transaction lost a race and was rolled back
    #[error("Aborted: {0}")]
    Aborted(String),
}

impl StoreError {
    /// Whether the document was already gone when the call reached it
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Full confirmed state of one list at a point in its change feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// List this snapshot describes
    pub list: ListId,

    /// Feed revision, increasing per list; for logging and ordering only
    pub revision: u64,

    /// Tasks in server order
    pub tasks: Arc<[Task]>,
}

impl Snapshot {
    /// Create a snapshot from a revision and its tasks
    pub fn new(list: ListId, revision: u64, tasks: Vec<Task>) -> Self {
        Self {
            list,
            revision,
            tasks: tasks.into(),
        }
    }

    /// Placeholder before the first snapshot arrives
    pub fn empty(list: ListId) -> Self {
        Self::new(list, 0, Vec::new())
    }

    /// Number of tasks in the snapshot
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether a task with this id is part of the snapshot
    pub fn contains_id(&self, id: &str) -> bool {
        self.tasks.iter().any(|t| t.id.as_deref() == Some(id))
    }
}

/// Typed access to the remote multi-collection document store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Start a live feed of full snapshots for a list.
    ///
    /// The first item is the current state; a new snapshot follows every
    /// change. The feed never ends on its own and must be cancelled.
    async fn subscribe(&self, list: ListId) -> StoreResult<Subscription>;

    /// Insert a new document and return its server-assigned id
    async fn create(&self, list: ListId, fields: &TaskFields) -> StoreResult<String>;

    /// Merge the given fields into an existing document
    async fn update(&self, list: ListId, id: &str, patch: &TaskPatch) -> StoreResult<()>;

    /// Remove a document
    async fn delete(&self, list: ListId, id: &str) -> StoreResult<()>;

    /// Delete `source_id` from `source` and create `fields` in `target`
    /// within one transaction; returns the id of the new document
    async fn atomic_move(
        &self,
        source: ListId,
        source_id: &str,
        target: ListId,
        fields: &TaskFields,
    ) -> StoreResult<String>;
}

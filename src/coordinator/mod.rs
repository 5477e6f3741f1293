//! Mutation coordinator

use crate::cache::ListCache;
use crate::config::BoardConfig;
use crate::overlay::SpeculativeOverlay;
use crate::store::{RemoteStore, StoreError};
use crate::task::{ListId, Task, TaskFields, TaskPatch};
use crate::BoardError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// How a move request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Source and target were the same list; nothing was sent
    Unchanged,
    /// The transaction committed; the task now lives under `new_id`
    Moved { new_id: String },
}

/// Runs every write against the remote store.
///
/// Never writes into a list cache: the only local state it touches is the
/// speculative overlay, and confirmed state always comes back through the
/// change feeds.
pub struct MutationCoordinator {
    store: Arc<dyn RemoteStore>,
    overlay: Arc<SpeculativeOverlay>,
    caches: Option<[Arc<ListCache>; 3]>,
    operation_timeout: Duration,
}

impl MutationCoordinator {
    /// Create a coordinator bounding each remote call by `operation_timeout`
    pub fn new(
        store: Arc<dyn RemoteStore>,
        overlay: Arc<SpeculativeOverlay>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            overlay,
            caches: None,
            operation_timeout,
        }
    }

    /// Create a coordinator using the configured timeout
    pub fn from_config(
        store: Arc<dyn RemoteStore>,
        overlay: Arc<SpeculativeOverlay>,
        config: &BoardConfig,
    ) -> Self {
        Self::new(store, overlay, config.operation_timeout())
    }

    /// Hold each committed move in the overlay until these caches show it
    pub fn with_caches(mut self, caches: [Arc<ListCache>; 3]) -> Self {
        self.caches = Some(caches);
        self
    }

    pub fn overlay(&self) -> &Arc<SpeculativeOverlay> {
        &self.overlay
    }

    /// Add a task to the Backlog.
    ///
    /// A blank title is ignored and yields `Ok(None)`; nothing is sent.
    pub async fn create_task(&self, fields: TaskFields) -> crate::Result<Option<String>> {
        if fields.is_blank() {
            debug!("Ignoring task with blank title");
            return Ok(None);
        }

        let result = self
            .bounded("create", self.store.create(ListId::Backlog, &fields))
            .await;

        match result {
            Ok(id) => {
                info!("Created task '{}' as {}/{}", fields.title, ListId::Backlog, id);
                Ok(Some(id))
            }
            Err(e) => {
                error!("Failed to create task '{}': {}", fields.title, e);
                Err(e)
            }
        }
    }

    /// Merge field changes into a stored task
    pub async fn update_task(&self, list: ListId, id: &str, patch: &TaskPatch) -> crate::Result<()> {
        let id = require_id(id, "update")?;
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(BoardError::InvalidArgument(
                "Task title cannot be blank".to_string(),
            ));
        }
        if patch.is_empty() {
            debug!("Empty patch for {}/{}, nothing to send", list, id);
            return Ok(());
        }

        let result = self
            .bounded("update", self.store.update(list, id, patch))
            .await;
        self.report("update", list, id, &result);
        result
    }

    /// Delete a stored task
    pub async fn delete_task(&self, list: ListId, id: &str) -> crate::Result<()> {
        let id = require_id(id, "delete")?;

        let result = self.bounded("delete", self.store.delete(list, id)).await;
        self.report("delete", list, id, &result);
        result
    }

    /// Move a task to another list as one remote transaction.
    ///
    /// The task is shown in `target` at once through the overlay. A failed
    /// move clears the intent right away. A committed one keeps it until
    /// the attached caches have delivered the commit, bounded by the
    /// operation timeout. The transaction runs in its own task so it
    /// finishes even if the caller goes away.
    pub async fn move_task(
        &self,
        task: &Task,
        source: ListId,
        target: ListId,
    ) -> crate::Result<MoveOutcome> {
        if source == target {
            debug!("Move of '{}' within {} ignored", task.title, source);
            return Ok(MoveOutcome::Unchanged);
        }

        let source_id = task
            .stored_id()
            .ok_or_else(|| {
                BoardError::InvalidArgument("Task id is required for moving".to_string())
            })?
            .to_string();

        let intent = self.overlay.register(task.clone(), source, target).await;

        let store = Arc::clone(&self.store);
        let overlay = Arc::clone(&self.overlay);
        let caches = self.caches.clone();
        let settle_timeout = self.operation_timeout;
        let fields = task.fields();
        let moving_id = source_id.clone();
        let (committed_tx, committed_rx) = oneshot::channel();
        let pending = tokio::spawn(async move {
            let result = store.atomic_move(source, &moving_id, target, &fields).await;
            let new_id = result.as_ref().ok().cloned();
            let _ = committed_tx.send(result);

            // Keep showing the move until both feeds have delivered the commit
            if let (Some(new_id), Some(caches)) = (new_id, caches) {
                let settled = timeout(settle_timeout, async {
                    caches[target.index()]
                        .confirmed(|s| s.contains_id(&new_id))
                        .await;
                    caches[source.index()]
                        .confirmed(|s| !s.contains_id(&moving_id))
                        .await;
                })
                .await;
                if settled.is_err() {
                    debug!("Feeds did not confirm move of {}/{} in time", source, moving_id);
                }
            }

            if let Some(intent) = intent {
                overlay.clear(intent).await;
            }
        });

        let result = match timeout(self.operation_timeout, committed_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StoreError::Unavailable(
                "move task stopped before reporting".to_string(),
            )),
            Err(_) => Err(StoreError::Unavailable(format!(
                "move timed out after {}s",
                self.operation_timeout.as_secs()
            ))),
        };

        match result {
            Ok(new_id) => {
                if let Err(e) = pending.await {
                    warn!("Move task for {}/{} panicked: {}", source, source_id, e);
                }
                info!(
                    "Moved '{}' {}/{} -> {}/{}",
                    task.title, source, source_id, target, new_id
                );
                Ok(MoveOutcome::Moved { new_id })
            }
            Err(e) => {
                // The transaction may still be running remotely after a timeout
                if let Some(intent) = intent {
                    self.overlay.clear(intent).await;
                }
                match &e {
                    StoreError::NotFound(_) | StoreError::Aborted(_) => warn!(
                        "Move of {}/{} lost: already moved by someone else ({})",
                        source, source_id, e
                    ),
                    _ => error!("Move of {}/{} to {} failed: {}", source, source_id, target, e),
                }
                Err(e.into())
            }
        }
    }

    async fn bounded<T, F>(&self, operation: &str, call: F) -> crate::Result<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match timeout(self.operation_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(StoreError::Unavailable(format!(
                "{} timed out after {}s",
                operation,
                self.operation_timeout.as_secs()
            ))
            .into()),
        }
    }

    fn report(&self, operation: &str, list: ListId, id: &str, result: &crate::Result<()>) {
        match result {
            Ok(()) => info!("{} of {}/{} succeeded", operation, list, id),
            Err(e) if e.is_not_found() => {
                info!("{} of {}/{}: already gone", operation, list, id)
            }
            Err(e) => error!("{} of {}/{} failed: {}", operation, list, id, e),
        }
    }
}

fn require_id<'a>(id: &'a str, operation: &str) -> crate::Result<&'a str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(BoardError::InvalidArgument(format!(
            "Task id is required to {}",
            operation
        )));
    }
    Ok(id)
}

//! Speculative overlay: in-flight moves layered over confirmed snapshots

use crate::store::Snapshot;
use crate::task::{ListId, Task};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

/// Identifies one registered move intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntentId(u64);

/// A cross-list move the remote store has not confirmed yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveIntent {
    pub id: IntentId,
    pub task: Task,
    pub source: ListId,
    pub target: ListId,
    pub submitted_at: DateTime<Utc>,
}

impl MoveIntent {
    /// Whether the intent changes how `list` is shown
    pub fn touches(&self, list: ListId) -> bool {
        self.source == list || self.target == list
    }
}

/// Splice in-flight moves into a confirmed snapshot.
///
/// Moved tasks are removed from their source list and appended to their
/// target list in submission order. The snapshot itself is never modified.
///
/// A committed move lands in the target under a new server id, so the
/// target side matches on field content as well as id: once the confirmed
/// copy shows up, the speculative one is not appended next to it.
pub fn apply(list: ListId, confirmed: &Snapshot, intents: &[MoveIntent]) -> Vec<Task> {
    let mut visible: Vec<Task> = confirmed.tasks.to_vec();

    for intent in intents.iter().filter(|i| i.touches(list)) {
        let moved_id = intent.task.id.as_deref();

        if intent.source == list {
            visible.retain(|t| t.id.as_deref() != moved_id);
        }

        if intent.target == list {
            let moved_fields = intent.task.fields();
            let already_shown = visible
                .iter()
                .any(|t| t.id.as_deref() == moved_id || t.fields() == moved_fields);
            if !already_shown {
                visible.push(intent.task.clone());
            }
        }
    }

    visible
}

struct OverlayInner {
    intents: Vec<MoveIntent>,
    next_id: u64,
    disposed: bool,
}

/// Registry of in-flight move intents.
///
/// Written only by the mutation coordinator; never touches a list cache.
/// After `dispose` every mutation is a no-op.
pub struct SpeculativeOverlay {
    inner: RwLock<OverlayInner>,
    version: watch::Sender<u64>,
}

impl SpeculativeOverlay {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: RwLock::new(OverlayInner {
                intents: Vec::new(),
                next_id: 0,
                disposed: false,
            }),
            version,
        }
    }

    /// Record a move; `None` if the overlay has been disposed
    pub async fn register(&self, task: Task, source: ListId, target: ListId) -> Option<IntentId> {
        let mut inner = self.inner.write().await;
        if inner.disposed {
            return None;
        }

        let id = IntentId(inner.next_id);
        inner.next_id += 1;
        debug!(
            "Move intent {:?}: '{}' {} -> {}",
            id, task.title, source, target
        );
        inner.intents.push(MoveIntent {
            id,
            task,
            source,
            target,
            submitted_at: Utc::now(),
        });
        drop(inner);

        self.bump();
        Some(id)
    }

    /// Drop a resolved intent. Unknown ids and a disposed overlay are no-ops.
    pub async fn clear(&self, id: IntentId) -> bool {
        let mut inner = self.inner.write().await;
        if inner.disposed {
            return false;
        }

        let before = inner.intents.len();
        inner.intents.retain(|intent| intent.id != id);
        let removed = inner.intents.len() != before;
        drop(inner);

        if removed {
            debug!("Move intent {:?} cleared", id);
            self.bump();
        }
        removed
    }

    /// Intents still in flight, oldest first
    pub async fn active(&self) -> Vec<MoveIntent> {
        self.inner.read().await.intents.clone()
    }

    /// Visible sequence for `list` given its confirmed snapshot
    pub async fn visible(&self, list: ListId, confirmed: &Snapshot) -> Vec<Task> {
        let inner = self.inner.read().await;
        apply(list, confirmed, &inner.intents)
    }

    /// Visible sequences for several lists against one set of intents.
    ///
    /// Holding the read lock across every list means a concurrent clear
    /// cannot leave a moved task in both lists or in neither.
    pub async fn visible_all(&self, confirmed: &[Arc<Snapshot>]) -> Vec<Vec<Task>> {
        let inner = self.inner.read().await;
        confirmed
            .iter()
            .map(|snapshot| apply(snapshot.list, snapshot, &inner.intents))
            .collect()
    }

    /// Forget every intent and refuse further changes
    pub async fn dispose(&self) {
        let mut inner = self.inner.write().await;
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        inner.intents.clear();
        drop(inner);
        self.bump();
    }

    pub async fn is_disposed(&self) -> bool {
        self.inner.read().await.disposed
    }

    /// Receiver that ticks whenever the set of intents changes
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl Default for SpeculativeOverlay {
    fn default() -> Self {
        Self::new()
    }
}

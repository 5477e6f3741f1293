//! Board view model

use crate::cache::ListCache;
use crate::config::BoardConfig;
use crate::coordinator::MutationCoordinator;
use crate::overlay::SpeculativeOverlay;
use crate::store::{RemoteStore, Snapshot};
use crate::task::{ListId, Task, TaskFields, TaskPatch};
use crate::BoardError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// What the presentation layer renders: one ordered sequence per list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardView {
    pub backlog: Vec<Task>,
    pub in_progress: Vec<Task>,
    pub done: Vec<Task>,
}

impl BoardView {
    /// Tasks shown for a list
    pub fn list(&self, list: ListId) -> &[Task] {
        match list {
            ListId::Backlog => &self.backlog,
            ListId::InProgress => &self.in_progress,
            ListId::Done => &self.done,
        }
    }

    async fn compose(overlay: &SpeculativeOverlay, snapshots: &[Arc<Snapshot>]) -> Self {
        let mut view = Self::default();
        let lists = overlay.visible_all(snapshots).await;
        for (snapshot, tasks) in snapshots.iter().zip(lists) {
            view.set(snapshot.list, tasks);
        }
        view
    }

    fn set(&mut self, list: ListId, tasks: Vec<Task>) {
        match list {
            ListId::Backlog => self.backlog = tasks,
            ListId::InProgress => self.in_progress = tasks,
            ListId::Done => self.done = tasks,
        }
    }

    /// Titles per list, handy for logs and assertions
    pub fn titles(&self, list: ListId) -> Vec<&str> {
        self.list(list).iter().map(|t| t.title.as_str()).collect()
    }
}

/// User action a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Move,
}

/// Failure delivered on the error channel for display
#[derive(Debug)]
pub struct OperationFailure {
    pub operation: Operation,
    pub error: BoardError,
}

/// What the edit dialog hands back when it closes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogResult {
    pub task: Task,
    pub delete: bool,
}

/// Composes the three list caches and the overlay into what the board shows,
/// and exposes the write surface to the presentation layer.
///
/// Owns every subscription; they are released exactly once on `shutdown` or
/// on drop, whichever comes first.
pub struct BoardViewModel {
    caches: [Arc<ListCache>; 3],
    overlay: Arc<SpeculativeOverlay>,
    coordinator: MutationCoordinator,
    view_tx: Arc<watch::Sender<BoardView>>,
    errors_tx: mpsc::UnboundedSender<OperationFailure>,
    errors_rx: Mutex<Option<mpsc::UnboundedReceiver<OperationFailure>>>,
    render: Option<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    torn_down: AtomicBool,
}

impl BoardViewModel {
    /// Build the view model without subscribing; lists subscribe on first read
    pub fn new(store: Arc<dyn RemoteStore>, config: &BoardConfig) -> Self {
        let caches = ListId::ALL.map(|list| Arc::new(ListCache::new(list, Arc::clone(&store))));
        let overlay = Arc::new(SpeculativeOverlay::new());
        let coordinator = MutationCoordinator::from_config(store, Arc::clone(&overlay), config)
            .with_caches(caches.clone());
        let (view_tx, _) = watch::channel(BoardView::default());
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            caches,
            overlay,
            coordinator,
            view_tx: Arc::new(view_tx),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
            render: None,
            shutdown_tx,
            torn_down: AtomicBool::new(false),
        }
    }

    /// Build the view model, subscribe all three lists and start publishing
    /// the live view
    pub async fn open(store: Arc<dyn RemoteStore>, config: &BoardConfig) -> crate::Result<Self> {
        let mut board = Self::new(store, config);
        board.start().await?;
        Ok(board)
    }

    /// Subscribe every list and spawn the task that keeps `watch()` current
    pub async fn start(&mut self) -> crate::Result<()> {
        if self.render.is_some() {
            return Ok(());
        }
        if self.is_torn_down() {
            return Err(BoardError::InvalidArgument(
                "Board has been shut down".to_string(),
            ));
        }

        for cache in &self.caches {
            cache.ensure_subscribed().await?;
        }

        let caches = self.caches.clone();
        let overlay = Arc::clone(&self.overlay);
        let view_tx = Arc::clone(&self.view_tx);
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.render = Some(tokio::spawn(run_render(caches, overlay, view_tx, shutdown_rx)));

        info!("Board started");
        Ok(())
    }

    /// Visible sequence for one list: confirmed snapshot plus in-flight moves
    pub async fn visible(&self, list: ListId) -> crate::Result<Vec<Task>> {
        let snapshot = self.cache(list).snapshot().await?;
        Ok(self.overlay.visible(list, &snapshot).await)
    }

    /// All three visible sequences at once, composed against a single read
    /// of the overlay
    pub async fn view(&self) -> crate::Result<BoardView> {
        let mut snapshots = Vec::with_capacity(self.caches.len());
        for cache in &self.caches {
            snapshots.push(cache.snapshot().await?);
        }
        Ok(BoardView::compose(&self.overlay, &snapshots).await)
    }

    /// Live view, updated on every confirmed snapshot or overlay change
    pub fn watch(&self) -> watch::Receiver<BoardView> {
        self.view_tx.subscribe()
    }

    /// Take the receiving end of the error channel; only the first call gets it
    pub fn take_errors(&self) -> Option<mpsc::UnboundedReceiver<OperationFailure>> {
        match self.errors_rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn cache(&self, list: ListId) -> &ListCache {
        &self.caches[list.index()]
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// New task from the create dialog; blank titles are dropped
    pub async fn submit_new_task(&self, title: &str, description: &str) {
        if self.refuse("create") {
            return;
        }
        let result = self
            .coordinator
            .create_task(TaskFields::new(title, description))
            .await
            .map(|_| ());
        self.surface(Operation::Create, result);
    }

    /// Edited fields from the edit dialog; blank titles are dropped
    pub async fn submit_edit(&self, list: ListId, id: &str, title: &str, description: &str) {
        if self.refuse("edit") {
            return;
        }
        if title.trim().is_empty() {
            debug!("Ignoring edit of {}/{} with blank title", list, id);
            return;
        }
        let patch = TaskPatch::replace(title, description);
        let result = self.coordinator.update_task(list, id, &patch).await;
        self.surface(Operation::Update, result);
    }

    /// Delete requested from the edit dialog
    pub async fn submit_delete(&self, list: ListId, id: &str) {
        if self.refuse("delete") {
            return;
        }
        let result = self.coordinator.delete_task(list, id).await;
        self.surface(Operation::Delete, result);
    }

    /// Completed drag gesture.
    ///
    /// Reordering inside one list is not persisted, so such drags are
    /// dropped without touching the overlay or the store.
    pub async fn submit_drag(&self, task: &Task, from: ListId, to: ListId, within_list_only: bool) {
        if within_list_only || from == to {
            debug!("Drag of '{}' within {} discarded", task.title, from);
            return;
        }
        if self.refuse("move") {
            return;
        }
        let result = self
            .coordinator
            .move_task(task, from, to)
            .await
            .map(|_| ());
        self.surface(Operation::Move, result);
    }

    /// Route the edit dialog's result to a delete or an edit
    pub async fn submit_dialog_result(&self, list: ListId, result: DialogResult) {
        let id = result.task.id.clone().unwrap_or_default();
        if result.delete {
            self.submit_delete(list, &id).await;
        } else {
            self.submit_edit(list, &id, &result.task.title, &result.task.description)
                .await;
        }
    }

    /// Release every subscription, stop the live view and drop all move
    /// intents. Moves already submitted still run to completion remotely.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&mut self, timeout_duration: Duration) -> crate::Result<()> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down board...");

        self.overlay.dispose().await;
        let _ = self.shutdown_tx.send(());
        for cache in &self.caches {
            cache.cancel();
        }

        let render = self.render.take();
        let caches = &self.caches;
        let stopped = timeout(timeout_duration, async {
            if let Some(render) = render {
                if let Err(e) = render.await {
                    warn!("Render task panicked: {}", e);
                }
            }
            for cache in caches {
                cache.close().await;
            }
        })
        .await;

        match stopped {
            Ok(()) => {
                info!("Board shut down");
                Ok(())
            }
            Err(_) => {
                warn!("Shutdown timeout exceeded, some feeds may still be stopping");
                Err(BoardError::ShutdownError(
                    "Shutdown timeout exceeded".to_string(),
                ))
            }
        }
    }

    fn refuse(&self, action: &str) -> bool {
        if self.is_torn_down() {
            warn!("Ignoring {} on a board that has been shut down", action);
            return true;
        }
        false
    }

    fn surface(&self, operation: Operation, result: crate::Result<()>) {
        let error = match result {
            Ok(()) => return,
            Err(e) => e,
        };

        if error.is_not_found() && matches!(operation, Operation::Update | Operation::Delete) {
            debug!("{:?} target already gone: {}", operation, error);
            return;
        }

        if self.errors_tx.send(OperationFailure { operation, error }).is_err() {
            debug!("{:?} failure dropped, nobody is listening", operation);
        }
    }
}

impl Drop for BoardViewModel {
    fn drop(&mut self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(());
        for cache in &self.caches {
            cache.cancel();
        }

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let overlay = Arc::clone(&self.overlay);
            runtime.spawn(async move { overlay.dispose().await });
        }
        debug!("Board dropped without shutdown; subscriptions released");
    }
}


async fn run_render(
    caches: [Arc<ListCache>; 3],
    overlay: Arc<SpeculativeOverlay>,
    view_tx: Arc<watch::Sender<BoardView>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut backlog_rx = caches[ListId::Backlog.index()].watch();
    let mut in_progress_rx = caches[ListId::InProgress.index()].watch();
    let mut done_rx = caches[ListId::Done.index()].watch();
    let mut overlay_rx = overlay.watch();

    loop {
        let snapshots: Vec<_> = caches.iter().map(|cache| cache.current()).collect();
        let view = BoardView::compose(&overlay, &snapshots).await;
        view_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });

        let changed = tokio::select! {
            _ = shutdown_rx.recv() => break,
            r = backlog_rx.changed() => r,
            r = in_progress_rx.changed() => r,
            r = done_rx.changed() => r,
            r = overlay_rx.changed() => r,
        };
        if changed.is_err() {
            break;
        }
    }
    debug!("Render task stopped");
}

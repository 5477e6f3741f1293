//! List cache: the confirmed snapshot of one list, kept current by its change feed

use crate::store::{RemoteStore, Snapshot, StoreResult, Subscription, SubscriptionHandle};
use crate::task::ListId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of a list's change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Nobody has read the list yet
    Uninitialized,
    /// Feed is live and replacing snapshots
    Subscribed,
    /// Feed released; the last snapshot is frozen
    Closed,
}

struct FeedState {
    status: CacheStatus,
    task: Option<JoinHandle<()>>,
}

/// Confirmed state of one list, fed only by that list's change feed.
///
/// The feed task is the single writer; every inbound snapshot replaces the
/// previous one whole.
pub struct ListCache {
    list: ListId,
    store: Arc<dyn RemoteStore>,
    snapshot_tx: Arc<watch::Sender<Arc<Snapshot>>>,
    feed: Mutex<FeedState>,
    handle: StdMutex<Option<SubscriptionHandle>>,
    closed: AtomicBool,
}

impl ListCache {
    /// Create a cache; nothing is subscribed until the first read
    pub fn new(list: ListId, store: Arc<dyn RemoteStore>) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::empty(list)));
        Self {
            list,
            store,
            snapshot_tx: Arc::new(snapshot_tx),
            feed: Mutex::new(FeedState {
                status: CacheStatus::Uninitialized,
                task: None,
            }),
            handle: StdMutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// List this cache mirrors
    pub fn list(&self) -> ListId {
        self.list
    }

    /// Where the cache is in its lifecycle
    pub async fn status(&self) -> CacheStatus {
        self.feed.lock().await.status
    }

    /// Subscribe to the list's feed if that has not happened yet.
    ///
    /// Waits for the first snapshot so a read right after this sees the
    /// list's current state. A failed subscribe leaves the cache
    /// uninitialized so the next read tries again.
    pub async fn ensure_subscribed(&self) -> StoreResult<()> {
        let mut feed = self.feed.lock().await;
        if feed.status != CacheStatus::Uninitialized {
            return Ok(());
        }
        if self.closed.load(Ordering::SeqCst) {
            feed.status = CacheStatus::Closed;
            return Ok(());
        }

        let mut subscription = self.store.subscribe(self.list).await?;
        let handle = subscription.handle();
        self.set_handle(Some(handle.clone()));

        // close() may have run while we were waiting on the store
        if self.closed.load(Ordering::SeqCst) {
            handle.cancel();
            feed.status = CacheStatus::Closed;
            return Ok(());
        }

        if let Some(first) = subscription.next().await {
            debug!("{} initial snapshot at revision {}", self.list, first.revision);
            self.snapshot_tx.send_replace(Arc::new(first));
        }

        let snapshot_tx = Arc::clone(&self.snapshot_tx);
        feed.task = Some(tokio::spawn(run_feed(self.list, subscription, snapshot_tx)));
        feed.status = CacheStatus::Subscribed;
        info!("Subscribed to {}", self.list);
        Ok(())
    }

    /// Current confirmed snapshot, subscribing on first use
    pub async fn snapshot(&self) -> StoreResult<Arc<Snapshot>> {
        self.ensure_subscribed().await?;
        Ok(self.current())
    }

    /// Last snapshot seen, without touching the feed
    pub fn current(&self) -> Arc<Snapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver that observes every snapshot replacement
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Wait until the confirmed snapshot satisfies `predicate`.
    ///
    /// Returns at once when the feed is not live, since nothing would ever
    /// replace the snapshot. Callers bound the wait themselves.
    pub async fn confirmed<F>(&self, mut predicate: F)
    where
        F: FnMut(&Snapshot) -> bool,
    {
        if self.status().await != CacheStatus::Subscribed {
            return;
        }
        let mut rx = self.watch();
        let _ = rx.wait_for(|snapshot| predicate(snapshot.as_ref())).await;
    }

    /// Cancel the feed without waiting for its task.
    ///
    /// Returns true only for the call that actually released the
    /// subscription; repeated calls are no-ops.
    pub fn cancel(&self) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        let handle = self.take_handle();
        match handle {
            Some(handle) => handle.cancel(),
            None => false,
        }
    }

    /// Cancel the feed and wait for its task to stop. Idempotent.
    pub async fn close(&self) {
        let released = self.cancel();

        let mut feed = self.feed.lock().await;
        feed.status = CacheStatus::Closed;
        if let Some(task) = feed.task.take() {
            if let Err(e) = task.await {
                warn!("Feed task for {} panicked: {}", self.list, e);
            }
        }

        if released {
            info!(
                "Closed {} at revision {}",
                self.list,
                self.current().revision
            );
        }
    }

    fn set_handle(&self, handle: Option<SubscriptionHandle>) {
        match self.handle.lock() {
            Ok(mut guard) => *guard = handle,
            Err(poisoned) => *poisoned.into_inner() = handle,
        }
    }

    fn take_handle(&self) -> Option<SubscriptionHandle> {
        match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl Drop for ListCache {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_feed(
    list: ListId,
    mut subscription: Subscription,
    snapshot_tx: Arc<watch::Sender<Arc<Snapshot>>>,
) {
    while let Some(snapshot) = subscription.next().await {
        debug!(
            "{} snapshot at revision {} ({} tasks)",
            list,
            snapshot.revision,
            snapshot.len()
        );
        snapshot_tx.send_replace(Arc::new(snapshot));
    }
    debug!("Feed for {} stopped", list);
}

use crate::store::Snapshot;
use crate::task::ListId;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// Boxed stream of snapshots backing a subscription
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Snapshot> + Send>>;

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// A live change feed for one list.
///
/// Dropping the subscription cancels it. Cancellation can also come from any
/// [`SubscriptionHandle`] cloned off it, at any point of the feed's life.
pub struct Subscription {
    list: ListId,
    stream: SnapshotStream,
    handle: SubscriptionHandle,
}

/// Cancels a subscription from outside the task consuming it
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    list: ListId,
    cancelled: watch::Sender<bool>,
    release: Mutex<Option<ReleaseFn>>,
}

impl Subscription {
    /// Wrap a snapshot stream; `release` runs exactly once on cancellation
    pub fn new<S, F>(list: ListId, stream: S, release: F) -> Self
    where
        S: Stream<Item = Snapshot> + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let (cancelled, _) = watch::channel(false);
        Self {
            list,
            stream: Box::pin(stream),
            handle: SubscriptionHandle {
                inner: Arc::new(HandleInner {
                    list,
                    cancelled,
                    release: Mutex::new(Some(Box::new(release))),
                }),
            },
        }
    }

    /// List whose changes this feed delivers
    pub fn list(&self) -> ListId {
        self.list
    }

    /// A handle that can cancel this subscription
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Next snapshot, or `None` once the subscription is cancelled or the
    /// underlying feed has ended
    pub async fn next(&mut self) -> Option<Snapshot> {
        if self.handle.is_cancelled() {
            return None;
        }

        let handle = self.handle.clone();
        tokio::select! {
            biased;
            _ = handle.cancelled() => None,
            snapshot = self.stream.next() => snapshot,
        }
    }

    /// Cancel the subscription; safe to call any number of times
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("list", &self.list)
            .field("cancelled", &self.handle.is_cancelled())
            .finish()
    }
}

impl SubscriptionHandle {
    /// Cancel the subscription and release its resources.
    ///
    /// Returns true only for the call that actually performed the release.
    pub fn cancel(&self) -> bool {
        self.inner.cancelled.send_replace(true);

        let release = match self.inner.release.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match release {
            Some(release) => {
                release();
                debug!("Subscription to {} released", self.inner.list);
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.borrow()
    }

    /// Resolves once the subscription has been cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancelled.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("list", &self.inner.list)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

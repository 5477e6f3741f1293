//! In-process document store with live change feeds, used by the demo
//! binary and by tests that need to steer remote behaviour.

use crate::store::{RemoteStore, Snapshot, StoreError, StoreResult, Subscription};
use crate::task::{Document, ListId, Task, TaskFields, TaskPatch};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// Operation kinds, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Subscribe,
    Create,
    Update,
    Delete,
    AtomicMove,
}

/// One collection: documents in arrival order plus its feed revision
#[derive(Default)]
struct Collection {
    revision: u64,
    documents: Vec<(String, Document)>,
}

impl Collection {
    fn position(&self, id: &str) -> Option<usize> {
        self.documents.iter().position(|(doc_id, _)| doc_id == id)
    }

    fn snapshot(&self, list: ListId) -> Snapshot {
        let tasks = self
            .documents
            .iter()
            .filter_map(|(id, doc)| match Task::from_document(id, doc) {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!("Skipping malformed document {}/{}: {}", list, id, e);
                    None
                }
            })
            .collect();
        Snapshot::new(list, self.revision, tasks)
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    by_list: HashMap<ListId, HashMap<u64, mpsc::UnboundedSender<Snapshot>>>,
}

/// In-process remote store with transactional moves and live change feeds.
///
/// Also carries the knobs tests need: one-shot failure injection per
/// operation and a gate that parks writes until released.
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<ListId, Collection>>>,
    subscribers: Arc<Mutex<Subscribers>>,
    faults: Arc<Mutex<HashMap<StoreOp, VecDeque<StoreError>>>>,
    gate: Arc<watch::Sender<bool>>,
}

/// Parks every write on the store until released or dropped
pub struct WriteGate {
    gate: Arc<watch::Sender<bool>>,
}

impl WriteGate {
    /// Let parked and future writes through
    pub fn release(self) {}
}

impl Drop for WriteGate {
    fn drop(&mut self) {
        self.gate.send_replace(false);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn doc_path(list: ListId, id: &str) -> String {
    format!("{}/{}", list.collection_name(), id)
}

fn encode(result: crate::Result<Document>) -> StoreResult<Document> {
    result.map_err(|e| StoreError::Aborted(format!("Invalid document: {}", e)))
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            faults: Arc::new(Mutex::new(HashMap::new())),
            gate: Arc::new(gate),
        }
    }

    /// Insert a document with a known id, publishing a snapshot like any write
    pub async fn seed(&self, list: ListId, id: &str, fields: &TaskFields) -> StoreResult<()> {
        let document = encode(fields.to_document())?;
        let mut collections = self.collections.write().await;
        let collection = collections.entry(list).or_default();
        match collection.position(id) {
            Some(pos) => collection.documents[pos].1 = document,
            None => collection.documents.push((id.to_string(), document)),
        }
        collection.revision += 1;
        self.publish(list, collection);
        Ok(())
    }

    /// Current confirmed tasks of a list, in server order
    pub async fn documents(&self, list: ListId) -> Vec<Task> {
        let collections = self.collections.read().await;
        match collections.get(&list) {
            Some(collection) => collection.snapshot(list).tasks.to_vec(),
            None => Vec::new(),
        }
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        lock(&self.faults).entry(op).or_default().push_back(error);
    }

    /// Park all writes until the returned gate is released or dropped
    pub fn hold_writes(&self) -> WriteGate {
        self.gate.send_replace(true);
        WriteGate {
            gate: Arc::clone(&self.gate),
        }
    }

    /// Number of live feeds on a list
    pub fn active_subscriptions(&self, list: ListId) -> usize {
        lock(&self.subscribers)
            .by_list
            .get(&list)
            .map_or(0, |subs| subs.len())
    }

    fn take_fault(&self, op: StoreOp) -> StoreResult<()> {
        match lock(&self.faults).get_mut(&op).and_then(|queue| queue.pop_front()) {
            Some(error) => {
                debug!("Injected failure for {:?}: {}", op, error);
                Err(error)
            }
            None => Ok(()),
        }
    }

    async fn admit_write(&self, op: StoreOp) -> StoreResult<()> {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|held| !*held).await;
        self.take_fault(op)
    }

    /// Push the collection's current state to every live feed on the list.
    /// Callers hold the collections write lock so revisions go out in order.
    fn publish(&self, list: ListId, collection: &Collection) {
        let snapshot = collection.snapshot(list);
        let mut subscribers = lock(&self.subscribers);
        if let Some(subs) = subscribers.by_list.get_mut(&list) {
            subs.retain(|_, tx| tx.send(snapshot.clone()).is_ok());
            debug!(
                "Published {} revision {} to {} subscribers",
                list,
                snapshot.revision,
                subs.len()
            );
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn subscribe(&self, list: ListId) -> StoreResult<Subscription> {
        self.take_fault(StoreOp::Subscribe)?;

        // Read lock keeps writers out between the first snapshot and registration
        let collections = self.collections.read().await;
        let current = match collections.get(&list) {
            Some(collection) => collection.snapshot(list),
            None => Snapshot::empty(list),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(current);

        let sub_id = {
            let mut subscribers = lock(&self.subscribers);
            let sub_id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.by_list.entry(list).or_default().insert(sub_id, tx);
            sub_id
        };
        drop(collections);

        debug!("Subscriber {} attached to {}", sub_id, list);

        let registry = Arc::clone(&self.subscribers);
        Ok(Subscription::new(
            list,
            UnboundedReceiverStream::new(rx),
            move || {
                if let Some(subs) = lock(&registry).by_list.get_mut(&list) {
                    subs.remove(&sub_id);
                }
                debug!("Subscriber {} detached from {}", sub_id, list);
            },
        ))
    }

    async fn create(&self, list: ListId, fields: &TaskFields) -> StoreResult<String> {
        self.admit_write(StoreOp::Create).await?;
        let document = encode(fields.to_document())?;

        let id = Uuid::new_v4().simple().to_string();
        let mut collections = self.collections.write().await;
        let collection = collections.entry(list).or_default();
        collection.documents.push((id.clone(), document));
        collection.revision += 1;
        self.publish(list, collection);

        debug!("Document {} created", doc_path(list, &id));
        Ok(id)
    }

    async fn update(&self, list: ListId, id: &str, patch: &TaskPatch) -> StoreResult<()> {
        self.admit_write(StoreOp::Update).await?;
        let changes = encode(patch.to_document())?;

        let mut collections = self.collections.write().await;
        let collection = collections.entry(list).or_default();
        let pos = collection
            .position(id)
            .ok_or_else(|| StoreError::NotFound(doc_path(list, id)))?;

        collection.documents[pos].1.extend(changes);
        collection.revision += 1;
        self.publish(list, collection);

        debug!("Document {} updated", doc_path(list, id));
        Ok(())
    }

    async fn delete(&self, list: ListId, id: &str) -> StoreResult<()> {
        self.admit_write(StoreOp::Delete).await?;

        let mut collections = self.collections.write().await;
        let collection = collections.entry(list).or_default();
        let pos = collection
            .position(id)
            .ok_or_else(|| StoreError::NotFound(doc_path(list, id)))?;

        collection.documents.remove(pos);
        collection.revision += 1;
        self.publish(list, collection);

        debug!("Document {} deleted", doc_path(list, id));
        Ok(())
    }

    async fn atomic_move(
        &self,
        source: ListId,
        source_id: &str,
        target: ListId,
        fields: &TaskFields,
    ) -> StoreResult<String> {
        self.admit_write(StoreOp::AtomicMove).await?;
        let document = encode(fields.to_document())?;

        // Both halves run under one write lock: nobody observes one without the other
        let mut collections = self.collections.write().await;

        let pos = collections
            .get(&source)
            .and_then(|collection| collection.position(source_id))
            .ok_or_else(|| StoreError::NotFound(doc_path(source, source_id)))?;

        let new_id = Uuid::new_v4().simple().to_string();

        let source_collection = collections.entry(source).or_default();
        source_collection.documents.remove(pos);
        source_collection.revision += 1;
        self.publish(source, source_collection);

        let target_collection = collections.entry(target).or_default();
        target_collection.documents.push((new_id.clone(), document));
        target_collection.revision += 1;
        self.publish(target, target_collection);

        debug!(
            "Moved {} to {}",
            doc_path(source, source_id),
            doc_path(target, &new_id)
        );
        Ok(new_id)
    }
}

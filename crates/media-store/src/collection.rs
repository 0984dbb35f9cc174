//! Typed, prefix-scoped view over a `Storage`, with subscriber fan-out.
//!
//! Every record of a collection lives under `prefix + identifier`. The
//! collection owns its subscriber registry: each subscriber gets a bounded
//! queue, and `emit` waits for room in every queue before returning, so a
//! slow subscriber slows emitters down instead of losing events.
//!
//! Writes never emit on their own. Callers that make a change externally
//! visible (reconciliation, sync, the update endpoint) call `emit` once the
//! write has succeeded.

use crate::codec::{Codec, CodecError, JsonCodec};
use crate::id::Identifier;
use crate::storage::{Storage, StorageError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::sync::{MutexGuard, mpsc};
use tracing::{debug, warn};

/// Default per-subscriber queue capacity.
pub const DEFAULT_EVENT_BUFFER: usize = 32;

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("{unreadable} of {total} records could not be read")]
    PartialRead { unreadable: usize, total: usize },
}

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Assign,
    Delete,
}

/// One change to a collection.
///
/// Delete events carry the value the record had before it was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageEvent<T> {
    pub id: Identifier,
    pub value: T,
    pub kind: EventKind,
}

impl<T> StorageEvent<T> {
    pub fn assign(id: Identifier, value: T) -> Self {
        Self {
            id,
            value,
            kind: EventKind::Assign,
        }
    }

    pub fn delete(id: Identifier, value: T) -> Self {
        Self {
            id,
            value,
            kind: EventKind::Delete,
        }
    }
}

/// Result of [`Collection::list`]: every readable record plus the keys that
/// could not be read.
#[derive(Debug)]
pub struct Listing<T> {
    pub items: BTreeMap<Identifier, T>,
    /// Storage keys (prefix included) that failed to decode or whose
    /// suffix is not a valid identifier.
    pub unreadable: Vec<String>,
}

impl<T> Listing<T> {
    /// Summary of the unreadable records, if there were any.
    ///
    /// This is informational: `items` is still complete for every record
    /// that could be read.
    pub fn partial_failure(&self) -> Option<CollectionError> {
        if self.unreadable.is_empty() {
            return None;
        }
        Some(CollectionError::PartialRead {
            unreadable: self.unreadable.len(),
            total: self.items.len() + self.unreadable.len(),
        })
    }
}

/// Live subscriber channels of one collection.
struct Registry<T> {
    senders: Mutex<Vec<(u64, mpsc::Sender<StorageEvent<T>>)>>,
    next_id: AtomicU64,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn insert(&self, tx: mpsc::Sender<StorageEvent<T>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, tx));
        id
    }

    fn remove(&self, id: u64) -> bool {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        let before = senders.len();
        senders.retain(|(i, _)| *i != id);
        senders.len() != before
    }

    fn snapshot(&self) -> Vec<(u64, mpsc::Sender<StorageEvent<T>>)> {
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn len(&self) -> usize {
        self.senders.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A subscriber's end of the fan-out.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T> {
    registry: Weak<Registry<T>>,
    id: u64,
    rx: mpsc::Receiver<StorageEvent<T>>,
}

impl<T> Subscription<T> {
    /// Next event, in emission order. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<StorageEvent<T>> {
        self.rx.recv().await
    }

    /// Leave the fan-out. Safe to call more than once.
    ///
    /// The channel is removed from the registry before it is closed, and
    /// an emitter still waiting for room in this queue is released with a
    /// failed send.
    pub fn unsubscribe(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                debug!("Subscriber {} unsubscribed", self.id);
            }
        }
        self.rx.close();
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Typed collection of records under one key prefix.
pub struct Collection<T, C = JsonCodec> {
    prefix: String,
    storage: Arc<dyn Storage>,
    codec: C,
    registry: Arc<Registry<T>>,
    buffer: usize,
    /// Serializes emissions so every subscriber sees the same order.
    fanout: tokio::sync::Mutex<()>,
    /// Exclusive section for read-modify-write sequences.
    mutations: tokio::sync::Mutex<()>,
}

impl<T> Collection<T, JsonCodec>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    pub fn new(prefix: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self::with_codec(prefix, storage, JsonCodec, DEFAULT_EVENT_BUFFER)
    }

    pub fn with_buffer(
        prefix: impl Into<String>,
        storage: Arc<dyn Storage>,
        buffer: usize,
    ) -> Self {
        Self::with_codec(prefix, storage, JsonCodec, buffer)
    }
}

impl<T, C> Collection<T, C>
where
    T: Clone + Send + 'static,
    C: Codec<T>,
{
    /// Create a collection with an explicit codec.
    ///
    /// `buffer` is the per-subscriber queue capacity; zero is raised to one.
    pub fn with_codec(
        prefix: impl Into<String>,
        storage: Arc<dyn Storage>,
        codec: C,
        buffer: usize,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            storage,
            codec,
            registry: Arc::new(Registry::new()),
            buffer: buffer.max(1),
            fanout: tokio::sync::Mutex::new(()),
            mutations: tokio::sync::Mutex::new(()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, id: &Identifier) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Every record under the prefix.
    ///
    /// Records that fail to decode are left out of `items` and reported in
    /// `unreadable`; only a storage failure makes the whole call fail.
    pub async fn list(&self) -> Result<Listing<T>, CollectionError> {
        let entries = self.storage.list().await?;
        let mut listing = Listing {
            items: BTreeMap::new(),
            unreadable: Vec::new(),
        };

        for (key, raw) in entries {
            let Some(suffix) = key.strip_prefix(&self.prefix) else {
                continue;
            };
            let id = match Identifier::parse(suffix) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping {}: {}", key, e);
                    listing.unreadable.push(key);
                    continue;
                }
            };
            match self.codec.decode(&raw) {
                Ok(value) => {
                    listing.items.insert(id, value);
                }
                Err(e) => {
                    warn!("Skipping unreadable record {}: {}", key, e);
                    listing.unreadable.push(key);
                }
            }
        }

        if let Some(summary) = listing.partial_failure() {
            warn!("{} listing: {}", self.prefix, summary);
        }
        Ok(listing)
    }

    /// Single record. An undecodable record is logged and reported as absent.
    pub async fn get(&self, id: &Identifier) -> Result<Option<T>, CollectionError> {
        let key = self.key(id);
        let Some(raw) = self.storage.get(&key).await? else {
            return Ok(None);
        };
        match self.codec.decode(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Unreadable record {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Write `value` under `id`. Does not emit.
    pub async fn assign(&self, id: &Identifier, value: &T) -> Result<(), CollectionError> {
        let raw = self.codec.encode(value)?;
        self.storage.assign(&self.key(id), &raw).await?;
        Ok(())
    }

    /// Remove `id`. Does not emit.
    pub async fn delete(&self, id: &Identifier) -> Result<(), CollectionError> {
        self.storage.delete(&self.key(id)).await?;
        Ok(())
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.registry.insert(tx);
        debug!("Subscriber {} joined {}", id, self.prefix);
        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
            rx,
        }
    }

    pub fn unsubscribe(&self, subscription: &mut Subscription<T>) {
        subscription.unsubscribe();
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Deliver `event` to every registered subscriber.
    ///
    /// Waits for queue space at each subscriber in turn. Subscribers whose
    /// channel has closed are pruned. Returns the number of deliveries.
    pub async fn emit(&self, event: StorageEvent<T>) -> usize {
        let _fanout = self.fanout.lock().await;
        let mut delivered = 0;

        for (id, tx) in self.registry.snapshot() {
            match tx.send(event.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => {
                    debug!("Removing closed subscriber {}", id);
                    self.registry.remove(id);
                }
            }
        }

        delivered
    }

    /// Enter the collection's exclusive section.
    ///
    /// Held across a read-modify-write sequence; emitting while holding it
    /// is allowed.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutations.lock().await
    }
}

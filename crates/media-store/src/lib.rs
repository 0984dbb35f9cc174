//! media-store: metadata store for a directory of media files.
//!
//! This crate provides:
//! - A prefix-scoped typed `Collection` over an abstract key/value `Storage`
//! - Fan-out of create/update/delete events to live subscribers
//! - Reconciliation of a collection against a directory, at startup and on
//!   filesystem notifications
//! - Two-way sync against a client's cached snapshot

pub mod codec;
pub mod collection;
pub mod id;
pub mod json_storage;
pub mod media;
pub mod reconcile;
pub mod storage;
pub mod sync;
pub mod watcher;

pub use codec::{Codec, CodecError, JsonCodec};
pub use collection::{
    Collection, CollectionError, DEFAULT_EVENT_BUFFER, EventKind, Listing, StorageEvent,
    Subscription,
};
pub use id::{Identifier, IdentifierError};
pub use json_storage::JsonFileStorage;
pub use media::{
    ExternalMedia, FieldUpdates, Media, Merge, MergeError, Resolve, UrlMapper,
    guess_metadata_from_path,
};
pub use reconcile::{ReconcileError, ReconcileReport, Reconciler, WatchHandle};
pub use storage::{MemStorage, Storage, StorageError};
pub use sync::{SyncError, SyncOutcome, sync_snapshot, sync_updates};
pub use watcher::{DirWatcher, WatchError};

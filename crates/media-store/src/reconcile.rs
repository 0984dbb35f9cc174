//! Filesystem reconciliation: keeps one record per regular file in a
//! directory.
//!
//! The join key between disk and collection is the record's absolute
//! `path`. `sync_fs` does a full pass; `apply_path` re-examines a single
//! path and is what the watcher task runs for every notification. Both
//! emit an event for every record they create or delete.
//!
//! Reconciliation assumes nothing else renames files in the directory while
//! a pass is running.

use crate::collection::{Collection, CollectionError, StorageEvent};
use crate::id::Identifier;
use crate::media::{Media, guess_metadata_from_path};
use crate::watcher::{DirWatcher, WatchError};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// What a reconciliation pass changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub removed: usize,
    /// Directory entries that were not indexed (hidden, not a regular file,
    /// or without a UTF-8 name).
    pub skipped: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.removed == 0
    }
}

/// Keeps a `Collection<Media>` in step with one directory.
#[derive(Clone)]
pub struct Reconciler {
    dir: PathBuf,
    collection: Arc<Collection<Media>>,
}

impl Reconciler {
    pub fn new(dir: impl Into<PathBuf>, collection: Arc<Collection<Media>>) -> Self {
        let dir: PathBuf = dir.into();
        // Match the paths the watcher reports.
        let dir = dir.canonicalize().unwrap_or(dir);
        Self { dir, collection }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn collection(&self) -> &Arc<Collection<Media>> {
        &self.collection
    }

    /// Regular, non-hidden files directly inside the directory.
    async fn scan(&self) -> Result<(BTreeSet<String>, usize), ReconcileError> {
        let io = |source: std::io::Error| ReconcileError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io)?;
        let mut files = BTreeSet::new();
        let mut skipped = 0;

        while let Some(entry) = entries.next_entry().await.map_err(io)? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!("Skipping non UTF-8 entry {:?}", path);
                skipped += 1;
                continue;
            };
            if name.starts_with('.') {
                debug!("Skipping hidden entry {:?}", path);
                skipped += 1;
                continue;
            }
            // DirEntry::file_type does not follow symlinks.
            let file_type = entry.file_type().await.map_err(io)?;
            if !file_type.is_file() {
                debug!("Skipping non-regular entry {:?}", path);
                skipped += 1;
                continue;
            }
            match path.to_str() {
                Some(p) => {
                    files.insert(p.to_string());
                }
                None => skipped += 1,
            }
        }

        Ok((files, skipped))
    }

    /// Make the collection match the directory.
    ///
    /// Records whose path is gone are deleted, duplicate records for one
    /// path are collapsed to one, and files without a record are indexed
    /// under a fresh identifier. Running it twice in a row changes nothing
    /// the second time.
    pub async fn sync_fs(&self) -> Result<ReconcileReport, ReconcileError> {
        let _guard = self.collection.lock().await;
        let (on_disk, skipped) = self.scan().await?;
        let listing = self.collection.list().await?;

        let mut report = ReconcileReport {
            skipped,
            ..Default::default()
        };
        let mut indexed: HashSet<String> = HashSet::new();

        for (id, media) in listing.items {
            if !on_disk.contains(&media.path) {
                info!("Removing stale record {} ({})", id, media.path);
                self.remove(id, media).await?;
                report.removed += 1;
            } else if !indexed.insert(media.path.clone()) {
                info!("Removing duplicate record {} ({})", id, media.path);
                self.remove(id, media).await?;
                report.removed += 1;
            }
        }

        for path in on_disk.iter().filter(|p| !indexed.contains(*p)) {
            if self.create(Path::new(path)).await? {
                report.created += 1;
            } else {
                report.skipped += 1;
            }
        }

        info!(
            "Reconciled {:?}: {} created, {} removed, {} skipped",
            self.dir, report.created, report.removed, report.skipped
        );
        Ok(report)
    }

    /// Re-examine one path inside the directory.
    ///
    /// A regular file without a record is indexed; a path that is no longer
    /// a regular file loses its records. Paths outside the directory and
    /// hidden names are ignored.
    pub async fn apply_path(&self, path: &Path) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();

        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_none_or(|n| n.starts_with('.'));
        if path.parent() != Some(self.dir.as_path()) || hidden {
            debug!("Ignoring {:?}", path);
            report.skipped += 1;
            return Ok(report);
        }
        let Some(path_str) = path.to_str() else {
            report.skipped += 1;
            return Ok(report);
        };

        let _guard = self.collection.lock().await;

        let is_file = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta.is_file(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(source) => {
                return Err(ReconcileError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let existing: Vec<(Identifier, Media)> = self
            .collection
            .list()
            .await?
            .items
            .into_iter()
            .filter(|(_, media)| media.path == path_str)
            .collect();

        if is_file {
            if existing.is_empty() && self.create(path).await? {
                report.created += 1;
            }
        } else {
            for (id, media) in existing {
                info!("Removing record {} ({})", id, media.path);
                self.remove(id, media).await?;
                report.removed += 1;
            }
        }

        Ok(report)
    }

    async fn create(&self, path: &Path) -> Result<bool, ReconcileError> {
        let Some(media) = guess_metadata_from_path(path) else {
            warn!("Cannot infer metadata for {:?}", path);
            return Ok(false);
        };
        let id = Identifier::generate();
        self.collection.assign(&id, &media).await?;
        info!("Indexed {} as {}", media.path, id);
        self.collection.emit(StorageEvent::assign(id, media)).await;
        Ok(true)
    }

    async fn remove(&self, id: Identifier, media: Media) -> Result<(), ReconcileError> {
        self.collection.delete(&id).await?;
        self.collection.emit(StorageEvent::delete(id, media)).await;
        Ok(())
    }

    /// Start watching, then run a full pass.
    ///
    /// The watcher is registered before the directory is scanned, so a file
    /// that changes during the scan is still reported afterwards. Seeing the
    /// same file from both sides is harmless: `apply_path` finds the record
    /// `sync_fs` created and does nothing.
    pub async fn start(&self) -> Result<(WatchHandle, ReconcileReport), ReconcileError> {
        let handle = self.watch()?;
        let report = self.sync_fs().await?;
        Ok((handle, report))
    }

    /// Follow filesystem notifications until the handle is stopped or
    /// dropped.
    ///
    /// Changes made before this call are not reported; run `sync_fs` after
    /// it (or use [`Reconciler::start`]) to pick them up.
    pub fn watch(&self) -> Result<WatchHandle, ReconcileError> {
        let mut watcher = DirWatcher::new(&self.dir)?;
        let reconciler = self.clone();

        let task = tokio::spawn(async move {
            while let Some(path) = watcher.next_path().await {
                match reconciler.apply_path(&path).await {
                    Ok(report) if !report.is_empty() => {
                        debug!("Applied {:?}: {:?}", path, report);
                    }
                    Ok(_) => {}
                    Err(e) => error!("Failed to reconcile {:?}: {}", path, e),
                }
            }
            debug!("Watcher for {:?} stopped", reconciler.dir);
        });

        info!("Watching {:?}", self.dir);
        Ok(WatchHandle { task })
    }
}

/// Running watch task. Dropping it stops the watcher.
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop watching. Dropping the handle does the same.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

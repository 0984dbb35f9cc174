//! Debounced watcher for the top level of one media directory.
//!
//! Uses notify-debouncer-mini and reports changed paths only. Whether a path
//! was created or removed is decided by whoever consumes the events, by
//! looking at the filesystem again.

use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Debounce period applied to raw notifications.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Watches one directory, non-recursively.
pub struct DirWatcher {
    dir: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<PathBuf>,
}

impl DirWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, WatchError> {
        let dir: PathBuf = dir.into();
        // Notifications carry resolved paths (e.g. /private/var on macOS).
        let dir = dir.canonicalize().unwrap_or(dir);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let filter_dir = dir.clone();

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(path) = Self::relevant_path(&event, &filter_dir) {
                            if event_tx.send(path).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)?;
        debug!("Watching {:?}", dir);

        Ok(Self {
            dir,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Direct, non-hidden children of `dir` only.
    fn relevant_path(event: &DebouncedEvent, dir: &Path) -> Option<PathBuf> {
        let path = &event.path;
        if path.parent() != Some(dir) {
            return None;
        }
        let name = path.file_name()?.to_str()?;
        if name.starts_with('.') {
            return None;
        }
        debug!("Path changed: {:?}", path);
        Some(path.clone())
    }

    /// Next changed path, `None` once the watcher has shut down.
    pub async fn next_path(&mut self) -> Option<PathBuf> {
        self.event_rx.recv().await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

//! Bridge between the `notify` file watcher and the loader.
//!
//! `notify` delivers events on its own backend thread; the bridge forwards
//! them into a tokio channel drained by a background task. The task holds
//! only a `Weak` handle to the loader, so a dropped loader ends the task
//! instead of being kept alive by it.

use std::path::{Path, PathBuf};
use std::sync::Weak;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::LoaderResult;
use crate::loader::ModuleLoader;

pub(crate) struct WatchHandle {
    watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Starts watching `paths` and spawns the draining task.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start(loader: Weak<ModuleLoader>, paths: Vec<PathBuf>) -> LoaderResult<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        })?;
        for path in &paths {
            if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
                warn!(path = %path.display(), error = %e, "Failed to watch tracked path");
            }
        }

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(loader) = loader.upgrade() else {
                    break;
                };
                loader.handle_fs_event(event).await;
            }
            debug!("File watch task stopped");
        });

        Ok(Self { watcher, task })
    }

    /// Adds `path` to the watch set.
    pub(crate) fn watch(&mut self, path: &Path) -> notify::Result<()> {
        self.watcher.watch(path, RecursiveMode::NonRecursive)
    }

    /// Removes `path` from the watch set. Failures are expected when the
    /// file is already gone and are only logged at debug level.
    pub(crate) fn unwatch(&mut self, path: &Path) {
        if let Err(e) = self.watcher.unwatch(path) {
            debug!(path = %path.display(), error = %e, "Unwatch failed (path likely removed)");
        }
    }

    /// Stops the watcher backend and the draining task.
    pub(crate) fn stop(self) {
        drop(self.watcher);
        self.task.abort();
    }
}

//! Module loading and hot-reload reconciliation.
//!
//! [`ModuleLoader`] bridges the file system to the dependency graph. It
//! tracks a set of source paths, materializes each into a
//! [`DependencyNode`] through the host's [`DependencyFactory`], and maps
//! source changes to graph mutations:
//!
//! - `add`: resolve → attach → mount, with full rollback on mount failure;
//! - `remove`: dispose → detach;
//! - `reload`: dispose-then-mount, strictly sequential — the old instance
//!   releases every resource before the replacement starts acquiring any.
//!
//! Content fingerprints distinguish genuine edits from file-system noise,
//! and every failure is emitted on the loader's `error` event so tooling
//! can observe problems without the process exiting.
//!
//! The loader deliberately does **not** own the lifetime of the nodes it
//! loads: disposing the loader stops the watches and detaches its own
//! listeners, nothing else. Node lifetime belongs to the graph; a host
//! shutdown disposes the root node, which cascades.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use indexmap::IndexMap;
use notify::EventKind;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use trellis_core::{BoxError, DependencyNode, Emitter, EventPayload, ListenerId, payload};

use crate::error::{LoaderError, LoaderResult};
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::watcher::WatchHandle;

/// Event names emitted by the [`ModuleLoader`].
pub mod events {
    /// A module was resolved, attached, and mounted; carries [`ModuleEvent`].
    ///
    /// [`ModuleEvent`]: super::ModuleEvent
    pub const ADD: &str = "add";
    /// A module was disposed and detached; carries [`ModuleEvent`].
    ///
    /// [`ModuleEvent`]: super::ModuleEvent
    pub const REMOVE: &str = "remove";
    /// A module was swapped for a fresh instance; carries [`ModuleEvent`].
    ///
    /// [`ModuleEvent`]: super::ModuleEvent
    pub const RELOAD: &str = "reload";
    /// A load, reload, or watch operation failed; carries [`LoaderFailure`].
    ///
    /// [`LoaderFailure`]: super::LoaderFailure
    pub const ERROR: &str = "error";
}

/// Payload of the `add` / `remove` / `reload` events.
#[derive(Debug, Clone)]
pub struct ModuleEvent {
    /// The tracked path the mutation applies to.
    pub path: PathBuf,
}

/// Payload of the `error` event: the single funnel surrounding tooling
/// observes to report failures.
#[derive(Debug, Clone)]
pub struct LoaderFailure {
    /// The tracked path, when the failure is tied to one.
    pub path: Option<PathBuf>,
    /// Rendered cause.
    pub message: String,
}

/// Host-defined factory the loader calls to materialize a node for a
/// resolved source unit. The host decides concrete node construction —
/// which contexts to register, name, priority, options.
#[async_trait]
pub trait DependencyFactory: Send + Sync {
    /// Builds a node (in the waiting state) for the source at `path`.
    async fn create_dependency(
        &self,
        path: &Path,
        source: &[u8],
    ) -> Result<Arc<DependencyNode>, BoxError>;
}

struct ModuleEntry {
    /// The currently live node, or `None` when the last load failed.
    node: Option<Arc<DependencyNode>>,
    /// Hash of the last-seen source, used to ignore no-op notifications.
    fingerprint: Option<Fingerprint>,
}

/// Maps tracked source paths to live dependency nodes and keeps the two in
/// sync as sources change.
///
/// # Invariants
///
/// - At most one live node per tracked path, ever: a reload fully disposes
///   the old instance (contexts, children, listeners) before the new one
///   begins mounting, so exclusive resources are never double-acquired.
/// - A failed mount never leaves a half-attached node in the graph.
pub struct ModuleLoader {
    parent: Arc<DependencyNode>,
    factory: Arc<dyn DependencyFactory>,
    entries: Mutex<IndexMap<PathBuf, ModuleEntry>>,
    emitter: Emitter,
    watch: Mutex<Option<WatchHandle>>,
    disposed: AtomicBool,
}

impl ModuleLoader {
    /// Creates a loader that attaches loaded modules under `parent`.
    pub fn new(parent: Arc<DependencyNode>, factory: Arc<dyn DependencyFactory>) -> Arc<Self> {
        Arc::new(Self {
            parent,
            factory,
            entries: Mutex::new(IndexMap::new()),
            emitter: Emitter::new(),
            watch: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    // ─── Graph mutations ─────────────────────────────────────────────────────

    /// Resolves the source at `path`, attaches the node, mounts it, and
    /// emits `add`.
    ///
    /// On failure the tracked entry records the attempt (so a later edit can
    /// retry), `error` is emitted, and the graph is left untouched.
    pub async fn add(&self, path: impl AsRef<Path>) -> LoaderResult<Arc<DependencyNode>> {
        self.ensure_live()?;
        let path = path.as_ref().to_path_buf();
        let already_live = self
            .entries
            .lock()
            .get(&path)
            .is_some_and(|entry| entry.node.is_some());
        if already_live {
            return Err(self.report(LoaderError::AlreadyLoaded { path }));
        }

        let node = self.load(path.clone()).await?;
        info!(path = %path.display(), node = %node.name(), "Module added");
        self.emitter.emit(events::ADD, payload(ModuleEvent { path }));
        Ok(node)
    }

    /// Disposes the live node for `path`, detaches it, emits `remove`, and
    /// stops tracking the path.
    pub async fn remove(&self, path: impl AsRef<Path>) -> LoaderResult<()> {
        self.ensure_live()?;
        let path = path.as_ref();
        let entry = self.entries.lock().shift_remove(path);
        let Some(entry) = entry else {
            return Err(self.report(LoaderError::NotTracked {
                path: path.to_path_buf(),
            }));
        };
        if let Some(handle) = self.watch.lock().as_mut() {
            handle.unwatch(path);
        }
        if let Some(node) = entry.node {
            node.dispose().await;
            self.parent.detach_child(node.filename());
        }
        info!(path = %path.display(), "Module removed");
        self.emitter.emit(
            events::REMOVE,
            payload(ModuleEvent {
                path: path.to_path_buf(),
            }),
        );
        Ok(())
    }

    /// Swaps the module at `path` for a freshly resolved instance.
    ///
    /// The old node is fully disposed **before** the new one begins
    /// mounting. If the new load fails, the path stays tracked with no live
    /// node and `error` is emitted.
    pub async fn reload(&self, path: impl AsRef<Path>) -> LoaderResult<Arc<DependencyNode>> {
        self.ensure_live()?;
        let path = path.as_ref();
        let old = {
            let mut entries = self.entries.lock();
            match entries.get_mut(path) {
                Some(entry) => entry.node.take(),
                None => {
                    drop(entries);
                    return Err(self.report(LoaderError::NotTracked {
                        path: path.to_path_buf(),
                    }));
                }
            }
        };
        if let Some(node) = old {
            node.dispose().await;
            self.parent.detach_child(node.filename());
            debug!(path = %path.display(), "Old module instance disposed");
        }

        let node = self.load(path.to_path_buf()).await?;
        info!(path = %path.display(), node = %node.name(), "Module reloaded");
        self.emitter.emit(
            events::RELOAD,
            payload(ModuleEvent {
                path: path.to_path_buf(),
            }),
        );
        Ok(node)
    }

    /// Entry point for file-change notifications.
    ///
    /// Re-hashes the source and reloads only when the content actually
    /// changed; notifications for untracked paths or unchanged content are
    /// ignored. Returns whether a reload ran.
    pub async fn changed(&self, path: impl AsRef<Path>) -> LoaderResult<bool> {
        self.ensure_live()?;
        let path = path.as_ref();
        let last = match self.entries.lock().get(path) {
            Some(entry) => entry.fingerprint,
            None => return Ok(false),
        };

        let source = match tokio::fs::read(path).await {
            Ok(source) => source,
            Err(source) => {
                return Err(self.report(LoaderError::Io {
                    path: path.to_path_buf(),
                    source,
                }));
            }
        };
        if last == Some(fingerprint(&source)) {
            debug!(path = %path.display(), "Content unchanged, ignoring notification");
            return Ok(false);
        }

        self.reload(path).await?;
        Ok(true)
    }

    /// Resolve → attach → mount for one path, recording the tracked entry
    /// in every outcome.
    async fn load(&self, path: PathBuf) -> LoaderResult<Arc<DependencyNode>> {
        let source = match tokio::fs::read(&path).await {
            Ok(source) => source,
            Err(source) => {
                self.track(path.clone(), None, None);
                return Err(self.report(LoaderError::Io { path, source }));
            }
        };
        let hash = fingerprint(&source);

        let node = match self.factory.create_dependency(&path, &source).await {
            Ok(node) => node,
            Err(source) => {
                self.track(path.clone(), None, Some(hash));
                return Err(self.report(LoaderError::Resolve { path, source }));
            }
        };

        if let Err(source) = self.parent.attach_child(Arc::clone(&node)) {
            self.track(path.clone(), None, Some(hash));
            return Err(self.report(LoaderError::Attach { path, source }));
        }

        if let Err(source) = node.mounted().await {
            // Roll back the partial attach; the graph never holds a
            // half-mounted module.
            node.dispose().await;
            self.parent.detach_child(node.filename());
            self.track(path.clone(), None, Some(hash));
            return Err(self.report(LoaderError::Mount { path, source }));
        }

        self.track(path, Some(Arc::clone(&node)), Some(hash));
        Ok(node)
    }

    fn track(
        &self,
        path: PathBuf,
        node: Option<Arc<DependencyNode>>,
        fingerprint: Option<Fingerprint>,
    ) {
        let newly_tracked = self
            .entries
            .lock()
            .insert(path.clone(), ModuleEntry { node, fingerprint })
            .is_none();
        if newly_tracked
            && let Some(handle) = self.watch.lock().as_mut()
            && let Err(e) = handle.watch(&path)
        {
            warn!(path = %path.display(), error = %e, "Failed to watch module path");
        }
    }

    /// Emits the failure on the `error` funnel, then hands it back to the
    /// caller.
    fn report(&self, error: LoaderError) -> LoaderError {
        let path = match &error {
            LoaderError::Io { path, .. }
            | LoaderError::Resolve { path, .. }
            | LoaderError::Attach { path, .. }
            | LoaderError::Mount { path, .. }
            | LoaderError::AlreadyLoaded { path }
            | LoaderError::NotTracked { path } => Some(path.clone()),
            LoaderError::Disposed | LoaderError::Watch(_) => None,
        };
        warn!(error = %error, "Loader operation failed");
        self.emitter.emit(
            events::ERROR,
            payload(LoaderFailure {
                path,
                message: error.to_string(),
            }),
        );
        error
    }

    fn ensure_live(&self) -> LoaderResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(LoaderError::Disposed)
        } else {
            Ok(())
        }
    }

    // ─── Watching ────────────────────────────────────────────────────────────

    /// Starts watching every tracked path for changes.
    ///
    /// File notifications funnel into [`changed`](Self::changed) (modify /
    /// create) and [`remove`](Self::remove) (delete). Paths tracked after
    /// this call are watched as they are added. Idempotent.
    pub fn watch(self: &Arc<Self>) -> LoaderResult<()> {
        self.ensure_live()?;
        let mut guard = self.watch.lock();
        if guard.is_some() {
            return Ok(());
        }
        let paths: Vec<PathBuf> = self.entries.lock().keys().cloned().collect();
        let count = paths.len();
        *guard = Some(WatchHandle::start(Arc::downgrade(self), paths)?);
        info!(paths = count, "File watching started");
        Ok(())
    }

    /// Returns `true` while a watcher is active.
    pub fn is_watching(&self) -> bool {
        self.watch.lock().is_some()
    }

    pub(crate) async fn handle_fs_event(&self, res: notify::Result<notify::Event>) {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "File watcher reported an error");
                self.emitter.emit(
                    events::ERROR,
                    payload(LoaderFailure {
                        path: None,
                        message: e.to_string(),
                    }),
                );
                return;
            }
        };
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in event.paths {
                    // Failures are already on the error funnel; nothing to
                    // rethrow inside a watch callback.
                    let _ = self.changed(&path).await;
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    if self.entries.lock().contains_key(&path) {
                        let _ = self.remove(&path).await;
                    }
                }
            }
            _ => {}
        }
    }

    // ─── Introspection ───────────────────────────────────────────────────────

    /// The live node for `path`, if one is mounted.
    pub fn node_for(&self, path: impl AsRef<Path>) -> Option<Arc<DependencyNode>> {
        self.entries
            .lock()
            .get(path.as_ref())
            .and_then(|entry| entry.node.clone())
    }

    /// Every tracked path, in tracking order.
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Number of tracked paths (live or not).
    pub fn module_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Number of tracked paths with a live node.
    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.node.is_some())
            .count()
    }

    // ─── Events ──────────────────────────────────────────────────────────────

    /// Registers a listener for one of the [`events`] names.
    pub fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        self.emitter.on(event, handler)
    }

    /// Removes a listener registered with [`on`](Self::on).
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.emitter.off(event, id)
    }

    /// Number of listeners for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.emitter.listener_count(event)
    }

    // ─── Teardown ────────────────────────────────────────────────────────────

    /// Stops all watches and detaches the loader's own listeners.
    ///
    /// Loaded nodes are left alone — their lifetime belongs to the graph.
    /// Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.watch.lock().take() {
            handle.stop();
        }
        self.emitter.close();
        info!("Module loader disposed");
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("tracked", &self.module_count())
            .field("live", &self.live_count())
            .field("watching", &self.is_watching())
            .finish()
    }
}

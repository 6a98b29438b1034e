//! Dependency nodes: the graph units of the Trellis runtime.
//!
//! A [`DependencyNode`] wraps one loadable unit (a plugin or module) and
//! owns everything that belongs to it:
//!
//! - a lifecycle state machine (`waiting → ready → disposed`, forward only),
//! - a [`ContextRegistry`] of named capabilities resolved during mount,
//! - an insertion-ordered map of child nodes keyed by filename,
//! - an embedded [`Emitter`] with `broadcast` / `dispatch` propagation.
//!
//! Parents own their children (strong `Arc` in the `children` map); each
//! child keeps a plain `Weak` back-pointer that is nulled on disposal, so
//! the graph never forms a strong reference cycle.
//!
//! # Example
//!
//! ```rust,ignore
//! let root = DependencyNode::root("app");
//! root.mounted().await?;
//!
//! let node = DependencyNode::new(NodeDescriptor::new("cache", "plugins/cache.rs"));
//! node.register(Context::new("cache", || async { Ok(Cache::open()?) }))?;
//! root.attach_child(Arc::clone(&node))?;
//! node.mounted().await?;
//!
//! let cache = node.resolve::<Cache>("cache")?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::context::{Context, ContextRegistry, ContextValue};
use crate::error::{BoxError, ContextError, GraphError, MountError};
use crate::events::{Emitter, EventPayload, ListenerId, names, payload};

// ─── Lifecycle ────────────────────────────────────────────────────────────────

/// Lifecycle state of a [`DependencyNode`].
///
/// States only ever move forward: `Waiting → Ready → Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    /// Constructed but not yet mounted.
    Waiting,
    /// Mounted; contexts resolved, serving lookups and events.
    Ready,
    /// Terminal; all resources released.
    Disposed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// Payload of the [`names::LIFECYCLE_CHANGED`] event.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleChanged {
    /// State before the transition.
    pub previous: LifecycleState,
    /// State after the transition.
    pub current: LifecycleState,
}

/// Payload of the [`names::OPTIONS_CHANGED`] event.
#[derive(Debug, Clone)]
pub struct OptionsChanged {
    /// Snapshot of the merged options bag.
    pub options: Value,
}

// ─── NodeDescriptor ───────────────────────────────────────────────────────────

/// Construction parameters for a [`DependencyNode`].
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    /// Logical name; may repeat across the graph.
    pub name: String,
    /// Unique key within the loader's tracked set.
    pub filename: String,
    /// Ordering weight among siblings; higher loads first.
    pub priority: i32,
    /// Arbitrary config bag, mutable at runtime.
    pub options: Value,
}

impl NodeDescriptor {
    /// Creates a descriptor with default priority and empty options.
    pub fn new(name: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
            priority: 0,
            options: Value::Object(Map::new()),
        }
    }

    /// Sets the sibling ordering weight.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the initial options bag.
    pub fn options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

// ─── DependencyNode ───────────────────────────────────────────────────────────

/// A graph node wrapping one loadable unit with lifecycle, contexts, and
/// children.
///
/// # Concurrency
///
/// `DependencyNode` is `Send + Sync`. Internal locks are never held across
/// suspension points: the only operations that suspend are `mounted()`
/// (awaiting context producers) and `dispose()` (awaiting teardown
/// callbacks and child disposal). The `children` and `contexts` maps are
/// mutated exclusively through the node's own methods.
pub struct DependencyNode {
    name: String,
    filename: String,
    priority: i32,
    options: Mutex<Value>,
    state: Mutex<LifecycleState>,
    parent: Mutex<Weak<DependencyNode>>,
    children: Mutex<IndexMap<String, Arc<DependencyNode>>>,
    contexts: Mutex<ContextRegistry>,
    emitter: Emitter,
    /// Set once `mounted()` begins; never cleared. Producers are consumed
    /// by the first mount attempt, so a second attempt must be rejected.
    mount_started: AtomicBool,
    /// Set for the duration of `mounted()`'s producer loop.
    mounting: AtomicBool,
    /// Set by `dispose()` when it races an in-flight mount.
    dispose_requested: AtomicBool,
    /// Guards the teardown sequence against re-entry.
    disposing: AtomicBool,
    dispose_hook_seq: AtomicU64,
}

impl DependencyNode {
    /// Creates a new node in the `Waiting` state.
    pub fn new(descriptor: NodeDescriptor) -> Arc<Self> {
        Arc::new(Self {
            name: descriptor.name,
            filename: descriptor.filename,
            priority: descriptor.priority,
            options: Mutex::new(descriptor.options),
            state: Mutex::new(LifecycleState::Waiting),
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(IndexMap::new()),
            contexts: Mutex::new(ContextRegistry::new()),
            emitter: Emitter::new(),
            mount_started: AtomicBool::new(false),
            mounting: AtomicBool::new(false),
            dispose_requested: AtomicBool::new(false),
            disposing: AtomicBool::new(false),
            dispose_hook_seq: AtomicU64::new(0),
        })
    }

    /// Creates a root node (no parent, synthetic filename).
    pub fn root(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let filename = format!("<{name}>");
        Self::new(NodeDescriptor::new(name, filename))
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    /// Logical name of the node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique filename key.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Sibling ordering weight.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Current lifecycle state.
    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Snapshot of the options bag.
    pub fn options(&self) -> Value {
        self.options.lock().clone()
    }

    /// Whether this node participates in startup sequencing.
    ///
    /// Disabled only by an explicit `"enabled": false` in the options bag.
    pub fn enabled(&self) -> bool {
        !matches!(self.options.lock().get("enabled"), Some(Value::Bool(false)))
    }

    /// Deep-merges `patch` into the options bag and emits
    /// [`names::OPTIONS_CHANGED`] with the merged snapshot.
    pub fn update_options(&self, patch: Value) {
        let snapshot = {
            let mut options = self.options.lock();
            merge_values(&mut options, patch);
            options.clone()
        };
        self.emit(names::OPTIONS_CHANGED, payload(OptionsChanged { options: snapshot }));
    }

    // ─── Context operations ──────────────────────────────────────────────────

    /// Registers a named capability on this node.
    ///
    /// Contexts can only be registered while the node is still `Waiting`;
    /// registering a name twice fails with [`ContextError::Duplicate`]
    /// rather than silently overwriting.
    pub fn register(&self, context: Context) -> Result<(), ContextError> {
        match self.lifecycle_state() {
            LifecycleState::Disposed => return Err(ContextError::Disposed),
            LifecycleState::Ready => {
                return Err(ContextError::RegisteredAfterMount {
                    name: context.name().to_string(),
                });
            }
            LifecycleState::Waiting => {}
        }
        if self.mount_started.load(Ordering::SeqCst) {
            return Err(ContextError::RegisteredAfterMount {
                name: context.name().to_string(),
            });
        }
        let name = context.name().to_string();
        self.contexts.lock().insert(context)?;
        debug!(node = %self.name, context = %name, "Context registered");
        Ok(())
    }

    /// Returns the raw value of a ready context.
    ///
    /// Fails fast when the node is not `Ready` yet — a waiting node never
    /// serves a partial value — as well as for unknown names.
    pub fn resolve_raw(&self, name: &str) -> Result<ContextValue, ContextError> {
        let state = self.lifecycle_state();
        let contexts = self.contexts.lock();
        match state {
            LifecycleState::Disposed => Err(ContextError::Disposed),
            LifecycleState::Waiting => {
                if contexts.contains(name) {
                    Err(ContextError::NotReady {
                        name: name.to_string(),
                    })
                } else {
                    Err(ContextError::Unknown {
                        name: name.to_string(),
                    })
                }
            }
            LifecycleState::Ready => contexts.get(name),
        }
    }

    /// Returns the value of a ready context, downcast to `T`.
    ///
    /// A known name holding a value of a different type fails with
    /// [`ContextError::TypeMismatch`].
    pub fn resolve<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ContextError> {
        self.resolve_raw(name)?
            .downcast::<T>()
            .map_err(|_| ContextError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Non-throwing readiness probe for a named context.
    pub fn context_is_ready(&self, name: &str) -> bool {
        self.contexts.lock().is_ready(name)
    }

    /// Runs `callback` once the named context is ready.
    ///
    /// The callback runs immediately if the context already resolved, and is
    /// queued until the mount settles otherwise. Queued callbacks are dropped
    /// if the node is disposed before ever becoming ready.
    pub fn use_context<F>(&self, name: &str, callback: F) -> Result<(), ContextError>
    where
        F: FnOnce(ContextValue) + Send + 'static,
    {
        if self.lifecycle_state() == LifecycleState::Disposed {
            return Err(ContextError::Disposed);
        }
        let ready_now = self.contexts.lock().when_ready(name, Box::new(callback))?;
        if let Some((waiter, value)) = ready_now {
            waiter(value);
        }
        Ok(())
    }

    /// Registers a context whose only purpose is running `callback` at
    /// teardown.
    pub fn on_dispose<F, Fut>(&self, callback: F) -> Result<(), ContextError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let seq = self.dispose_hook_seq.fetch_add(1, Ordering::SeqCst);
        let context = Context::value(format!("dispose#{seq}"), ()).on_dispose(move || async move {
            callback().await;
            Ok::<(), BoxError>(())
        });
        self.register(context)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Mounts the node: awaits every registered context producer, in
    /// registration order, then transitions to `Ready`.
    ///
    /// If any producer fails the node stays `Waiting` and the error is
    /// surfaced to the caller — the node is never incorrectly marked ready.
    /// A `dispose()` that arrives while producers are still resolving is
    /// honored as soon as they settle: the node finishes in `Disposed` and
    /// `mounted()` reports [`MountError::DisposedWhileMounting`].
    pub async fn mounted(self: &Arc<Self>) -> Result<(), MountError> {
        match self.lifecycle_state() {
            LifecycleState::Ready => {
                return Err(MountError::AlreadyMounted {
                    node: self.name.clone(),
                });
            }
            LifecycleState::Disposed => {
                return Err(MountError::Disposed {
                    node: self.name.clone(),
                });
            }
            LifecycleState::Waiting => {}
        }
        if self.mount_started.swap(true, Ordering::SeqCst) {
            return Err(MountError::AlreadyMounted {
                node: self.name.clone(),
            });
        }
        self.mounting.store(true, Ordering::SeqCst);

        let producers = self.contexts.lock().take_producers();
        for (name, producer) in producers {
            match producer().await {
                Ok(value) => self.contexts.lock().fulfill(&name, value),
                Err(source) => {
                    self.mounting.store(false, Ordering::SeqCst);
                    if self.dispose_requested.swap(false, Ordering::SeqCst) {
                        self.dispose().await;
                        return Err(MountError::DisposedWhileMounting {
                            node: self.name.clone(),
                        });
                    }
                    return Err(MountError::Producer {
                        context: name,
                        source,
                    });
                }
            }
        }
        self.mounting.store(false, Ordering::SeqCst);

        if self.dispose_requested.swap(false, Ordering::SeqCst) {
            self.dispose().await;
            return Err(MountError::DisposedWhileMounting {
                node: self.name.clone(),
            });
        }

        self.transition(LifecycleState::Ready);
        debug!(node = %self.name, filename = %self.filename, "Node mounted");

        let waiters = self.contexts.lock().drain_ready_waiters();
        for (waiter, value) in waiters {
            waiter(value);
        }
        Ok(())
    }

    /// Disposes the node and everything it owns. Idempotent.
    ///
    /// Teardown order: children depth-first, then context dispose callbacks
    /// in reverse registration order, then the [`names::DISPOSE`] event
    /// (while listeners are still attached), then listener detach, map
    /// clearing, parent unlink, and the terminal state transition.
    ///
    /// A failing dispose callback is logged and does not abort the
    /// remaining teardown — leaving other resources unreleased would be
    /// worse than one failed callback.
    pub fn dispose(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let node = Arc::clone(self);
        Box::pin(async move {
            if node.lifecycle_state() == LifecycleState::Disposed {
                return;
            }
            if node.mounting.load(Ordering::SeqCst) {
                node.dispose_requested.store(true, Ordering::SeqCst);
                debug!(node = %node.name, "Dispose requested mid-mount, deferring teardown");
                return;
            }
            if node.disposing.swap(true, Ordering::SeqCst) {
                return;
            }

            let children: Vec<Arc<DependencyNode>> =
                node.children.lock().values().cloned().collect();
            for child in children {
                child.dispose().await;
            }

            let disposers = node.contexts.lock().take_disposers();
            for (name, disposer) in disposers {
                if let Err(e) = disposer().await {
                    error!(
                        node = %node.name,
                        context = %name,
                        error = %e,
                        "Context dispose callback failed"
                    );
                }
            }

            node.emit(names::DISPOSE, Emitter::unit());
            node.emitter.close();
            node.children.lock().clear();
            node.contexts.lock().clear();
            *node.parent.lock() = Weak::new();
            node.transition(LifecycleState::Disposed);
            debug!(node = %node.name, filename = %node.filename, "Node disposed");
        })
    }

    /// Performs a forward-only state transition, emitting
    /// [`names::LIFECYCLE_CHANGED`].
    fn transition(&self, next: LifecycleState) {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if next <= previous {
                return;
            }
            *state = next;
            previous
        };
        self.emit(
            names::LIFECYCLE_CHANGED,
            payload(LifecycleChanged {
                previous,
                current: next,
            }),
        );
    }

    // ─── Hierarchy ───────────────────────────────────────────────────────────

    /// Attaches `child`, keyed by its filename, and sets its parent
    /// back-pointer.
    ///
    /// This is the only way a child enters the `children` map.
    pub fn attach_child(self: &Arc<Self>, child: Arc<DependencyNode>) -> Result<(), GraphError> {
        if self.lifecycle_state() == LifecycleState::Disposed
            || child.lifecycle_state() == LifecycleState::Disposed
        {
            return Err(GraphError::Disposed {
                filename: child.filename.clone(),
            });
        }
        let mut children = self.children.lock();
        if children.contains_key(child.filename()) {
            return Err(GraphError::DuplicateChild {
                filename: child.filename.clone(),
            });
        }
        *child.parent.lock() = Arc::downgrade(self);
        debug!(parent = %self.name, child = %child.name, filename = %child.filename, "Child attached");
        children.insert(child.filename.clone(), child);
        Ok(())
    }

    /// Removes the child registered under `filename` and nulls its parent
    /// back-pointer. Returns the detached node, if any.
    pub fn detach_child(&self, filename: &str) -> Option<Arc<DependencyNode>> {
        let removed = self.children.lock().shift_remove(filename);
        if let Some(child) = &removed {
            *child.parent.lock() = Weak::new();
            debug!(parent = %self.name, child = %child.name, filename = %filename, "Child detached");
        }
        removed
    }

    /// The parent node, if still attached.
    pub fn parent(&self) -> Option<Arc<DependencyNode>> {
        self.parent.lock().upgrade()
    }

    /// Exact lookup in the immediate children map (not recursive).
    pub fn find_child(&self, filename: &str) -> Option<Arc<DependencyNode>> {
        self.children.lock().get(filename).cloned()
    }

    /// First immediate child with the given logical name, in insertion order.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<DependencyNode>> {
        self.children
            .lock()
            .values()
            .find(|child| child.name() == name)
            .cloned()
    }

    /// Snapshot of the immediate children, in insertion order.
    pub fn children(&self) -> Vec<Arc<DependencyNode>> {
        self.children.lock().values().cloned().collect()
    }

    /// Number of immediate children.
    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    /// Children with `options.enabled != false`, sorted descending by
    /// priority; ties keep insertion order (stable sort).
    ///
    /// This ordering is the contract deterministic startup sequencing
    /// relies on.
    pub fn enabled_dependencies(&self) -> Vec<Arc<DependencyNode>> {
        let mut deps: Vec<Arc<DependencyNode>> = self
            .children
            .lock()
            .values()
            .filter(|child| child.enabled())
            .cloned()
            .collect();
        deps.sort_by_key(|child| std::cmp::Reverse(child.priority()));
        deps
    }

    /// Every node in the subtree (including this one), depth-first
    /// pre-order. Never contains disposed nodes.
    pub fn all_dependencies(self: &Arc<Self>) -> Vec<Arc<DependencyNode>> {
        let mut out = Vec::new();
        self.collect_subtree(&mut out);
        out
    }

    fn collect_subtree(self: &Arc<Self>, out: &mut Vec<Arc<DependencyNode>>) {
        if self.lifecycle_state() == LifecycleState::Disposed {
            return;
        }
        out.push(Arc::clone(self));
        let children: Vec<Arc<DependencyNode>> = self.children.lock().values().cloned().collect();
        for child in &children {
            child.collect_subtree(out);
        }
    }

    // ─── Events ──────────────────────────────────────────────────────────────

    /// Registers a listener on this node's emitter.
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

    /// Emits `event` on this node only.
    pub fn emit(&self, event: &str, payload: EventPayload) {
        self.emitter.emit(event, payload);
    }

    /// Number of listeners for `event` on this node.
    pub fn listener_count(&self, event: &str) -> usize {
        self.emitter.listener_count(event)
    }

    /// Emits `event` on this node, then on every descendant, top-down
    /// pre-order. Disposed subtrees are skipped.
    pub fn broadcast(&self, event: &str, payload: EventPayload) {
        if self.lifecycle_state() == LifecycleState::Disposed {
            return;
        }
        self.emit(event, payload.clone());
        let children: Vec<Arc<DependencyNode>> = self.children.lock().values().cloned().collect();
        for child in children {
            child.broadcast(event, payload.clone());
        }
    }

    /// Emits `event` on the immediate parent's listeners.
    ///
    /// Bubbling stops there by default; a parent handler that wants deeper
    /// propagation re-dispatches from its own node.
    pub fn dispatch(&self, event: &str, payload: EventPayload) {
        if let Some(parent) = self.parent() {
            parent.emit(event, payload);
        }
    }
}

impl fmt::Debug for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyNode")
            .field("name", &self.name)
            .field("filename", &self.filename)
            .field("state", &self.lifecycle_state())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Recursively merges `patch` into `target`; objects merge key-wise, every
/// other value replaces wholesale.
fn merge_values(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    fn node(name: &str, filename: &str) -> Arc<DependencyNode> {
        DependencyNode::new(NodeDescriptor::new(name, filename))
    }

    #[tokio::test]
    async fn test_lifecycle_moves_forward_only() {
        let n = node("a", "a.rs");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        n.on(names::LIFECYCLE_CHANGED, move |p| {
            let change = p.downcast_ref::<LifecycleChanged>().unwrap();
            s.lock().push((change.previous, change.current));
        });

        assert_eq!(n.lifecycle_state(), LifecycleState::Waiting);
        n.mounted().await.unwrap();
        assert_eq!(n.lifecycle_state(), LifecycleState::Ready);
        n.dispose().await;
        assert_eq!(n.lifecycle_state(), LifecycleState::Disposed);

        // The disposed transition happens after listener teardown, so only
        // the waiting→ready edge is observable here.
        assert_eq!(
            *seen.lock(),
            vec![(LifecycleState::Waiting, LifecycleState::Ready)]
        );
    }

    #[tokio::test]
    async fn test_double_mount_fails() {
        let n = node("a", "a.rs");
        n.mounted().await.unwrap();
        assert!(matches!(
            n.mounted().await,
            Err(MountError::AlreadyMounted { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_before_and_after_mount() {
        let n = node("a", "a.rs");
        n.register(Context::value("answer", 42u32)).unwrap();

        assert!(matches!(
            n.resolve::<u32>("answer"),
            Err(ContextError::NotReady { .. })
        ));
        assert!(matches!(
            n.resolve::<u32>("missing"),
            Err(ContextError::Unknown { .. })
        ));
        assert!(!n.context_is_ready("answer"));

        n.mounted().await.unwrap();

        assert_eq!(*n.resolve::<u32>("answer").unwrap(), 42);
        assert!(n.context_is_ready("answer"));
        // Unknown names still fail after mount.
        assert!(matches!(
            n.resolve::<u32>("missing"),
            Err(ContextError::Unknown { .. })
        ));
        // Known name, wrong type.
        assert!(matches!(
            n.resolve::<String>("answer"),
            Err(ContextError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_collision_fails_but_siblings_are_independent() {
        let a = node("a", "a.rs");
        let b = node("b", "b.rs");

        a.register(Context::value("db", 1u32)).unwrap();
        assert!(matches!(
            a.register(Context::value("db", 2u32)),
            Err(ContextError::Duplicate { .. })
        ));
        // The same name on a different node is fine.
        b.register(Context::value("db", 2u32)).unwrap();

        a.mounted().await.unwrap();
        b.mounted().await.unwrap();
        assert_eq!(*a.resolve::<u32>("db").unwrap(), 1);
        assert_eq!(*b.resolve::<u32>("db").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_register_after_mount_fails() {
        let n = node("a", "a.rs");
        n.mounted().await.unwrap();
        assert!(matches!(
            n.register(Context::value("late", ())),
            Err(ContextError::RegisteredAfterMount { .. })
        ));
    }

    #[tokio::test]
    async fn test_mount_failure_leaves_node_waiting() {
        let n = node("a", "a.rs");
        n.register(Context::value("ok", 1u32)).unwrap();
        n.register(Context::new("bad", || async {
            Err::<u32, _>("boom".into())
        }))
        .unwrap();

        let err = n.mounted().await.unwrap_err();
        assert!(matches!(err, MountError::Producer { ref context, .. } if context == "bad"));
        assert_eq!(n.lifecycle_state(), LifecycleState::Waiting);
        // Still not serving values.
        assert!(n.resolve::<u32>("ok").is_err());
        // Producers are consumed; the instance cannot be mounted again.
        assert!(matches!(
            n.mounted().await,
            Err(MountError::AlreadyMounted { .. })
        ));
        assert_eq!(n.lifecycle_state(), LifecycleState::Waiting);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let n = node("a", "a.rs");
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        n.on_dispose(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        n.mounted().await.unwrap();
        n.dispose().await;
        n.dispose().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(n.lifecycle_state(), LifecycleState::Disposed);
    }

    #[tokio::test]
    async fn test_dispose_cascades_to_children() {
        let root = node("root", "root.rs");
        let mid = node("mid", "mid.rs");
        let leaf = node("leaf", "leaf.rs");

        root.attach_child(Arc::clone(&mid)).unwrap();
        mid.attach_child(Arc::clone(&leaf)).unwrap();
        root.mounted().await.unwrap();
        mid.mounted().await.unwrap();
        leaf.mounted().await.unwrap();

        let before = root.all_dependencies();
        assert_eq!(before.len(), 3);

        root.dispose().await;

        for n in &before {
            assert_eq!(n.lifecycle_state(), LifecycleState::Disposed);
        }
        assert_eq!(root.child_count(), 0);
        assert_eq!(mid.child_count(), 0);
        assert!(leaf.parent().is_none());
    }

    #[tokio::test]
    async fn test_dispose_order_children_then_contexts_reversed() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let parent = node("parent", "parent.rs");
        let child = node("child", "child.rs");
        parent.attach_child(Arc::clone(&child)).unwrap();

        let o = Arc::clone(&order);
        child
            .on_dispose(move || async move { o.lock().push("child") })
            .unwrap();
        let o = Arc::clone(&order);
        parent
            .on_dispose(move || async move { o.lock().push("parent-first") })
            .unwrap();
        let o = Arc::clone(&order);
        parent
            .on_dispose(move || async move { o.lock().push("parent-second") })
            .unwrap();

        parent.mounted().await.unwrap();
        child.mounted().await.unwrap();
        parent.dispose().await;

        // Children first, then the parent's own hooks in reverse order.
        assert_eq!(*order.lock(), vec!["child", "parent-second", "parent-first"]);
    }

    #[tokio::test]
    async fn test_failing_dispose_callback_does_not_abort_teardown() {
        let n = node("a", "a.rs");
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        n.register(Context::value("first", ()).on_dispose(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
        n.register(
            Context::value("failing", ())
                .on_dispose(move || async move { Err::<(), _>("teardown boom".into()) }),
        )
        .unwrap();

        n.mounted().await.unwrap();
        n.dispose().await;

        // The sibling's callback still ran and the node still terminated.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(n.lifecycle_state(), LifecycleState::Disposed);
    }

    #[tokio::test]
    async fn test_dispose_event_fires_before_listener_teardown() {
        let n = node("a", "a.rs");
        let observed = Arc::new(AtomicUsize::new(0));

        let o = Arc::clone(&observed);
        n.on(names::DISPOSE, move |_| {
            o.fetch_add(1, Ordering::SeqCst);
        });

        n.mounted().await.unwrap();
        n.dispose().await;
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        // Nothing fires after teardown.
        n.emit(names::DISPOSE, Emitter::unit());
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(n.listener_count(names::DISPOSE), 0);
    }

    #[tokio::test]
    async fn test_dispose_during_mount_settles_to_disposed() {
        let n = node("slow", "slow.rs");
        let (tx, rx) = oneshot::channel::<()>();

        n.register(Context::new("gate", move || async move {
            rx.await.ok();
            Ok(1u32)
        }))
        .unwrap();

        let mount = tokio::spawn({
            let n = Arc::clone(&n);
            async move { n.mounted().await }
        });
        // Let the mount reach the producer await.
        tokio::task::yield_now().await;

        n.dispose().await;
        assert_eq!(n.lifecycle_state(), LifecycleState::Waiting);

        tx.send(()).unwrap();
        let result = mount.await.unwrap();
        assert!(matches!(result, Err(MountError::DisposedWhileMounting { .. })));
        assert_eq!(n.lifecycle_state(), LifecycleState::Disposed);
    }

    #[tokio::test]
    async fn test_use_context_immediate_and_queued() {
        let n = node("a", "a.rs");
        n.register(Context::value("answer", 42u32)).unwrap();

        let queued = Arc::new(AtomicUsize::new(0));
        let q = Arc::clone(&queued);
        n.use_context("answer", move |value| {
            q.store(*value.downcast::<u32>().unwrap() as usize, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(queued.load(Ordering::SeqCst), 0);

        n.mounted().await.unwrap();
        assert_eq!(queued.load(Ordering::SeqCst), 42);

        // Already ready: runs immediately.
        let immediate = Arc::new(AtomicUsize::new(0));
        let i = Arc::clone(&immediate);
        n.use_context("answer", move |value| {
            i.store(*value.downcast::<u32>().unwrap() as usize, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(immediate.load(Ordering::SeqCst), 42);

        assert!(matches!(
            n.use_context("missing", |_| {}),
            Err(ContextError::Unknown { .. })
        ));
    }

    #[tokio::test]
    async fn test_broadcast_preorder_exactly_once() {
        let root = node("root", "root.rs");
        let a = node("a", "a.rs");
        let b = node("b", "b.rs");
        let a1 = node("a1", "a1.rs");

        root.attach_child(Arc::clone(&a)).unwrap();
        root.attach_child(Arc::clone(&b)).unwrap();
        a.attach_child(Arc::clone(&a1)).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for n in [&root, &a, &a1, &b] {
            let o = Arc::clone(&order);
            let name = n.name().to_string();
            n.on("shutdown", move |_| o.lock().push(name.clone()));
        }

        root.broadcast("shutdown", Emitter::unit());
        assert_eq!(*order.lock(), vec!["root", "a", "a1", "b"]);
    }

    #[tokio::test]
    async fn test_dispatch_reaches_parent_only() {
        let root = node("root", "root.rs");
        let mid = node("mid", "mid.rs");
        let leaf = node("leaf", "leaf.rs");
        root.attach_child(Arc::clone(&mid)).unwrap();
        mid.attach_child(Arc::clone(&leaf)).unwrap();

        let hits = Arc::new(Mutex::new(Vec::new()));
        for n in [&root, &mid] {
            let h = Arc::clone(&hits);
            let name = n.name().to_string();
            n.on("message.receive", move |_| h.lock().push(name.clone()));
        }

        leaf.dispatch("message.receive", Emitter::unit());
        assert_eq!(*hits.lock(), vec!["mid"]);

        // A parent handler that wants deeper bubbling re-dispatches itself.
        let h = Arc::clone(&hits);
        let mid_clone = Arc::clone(&mid);
        mid.on("bubble", move |_| {
            h.lock().push("mid-bubble".to_string());
            mid_clone.dispatch("bubble", Emitter::unit());
        });
        let h = Arc::clone(&hits);
        root.on("bubble", move |_| h.lock().push("root-bubble".to_string()));

        leaf.dispatch("bubble", Emitter::unit());
        assert_eq!(
            *hits.lock(),
            vec!["mid", "mid-bubble", "root-bubble"]
        );
    }

    #[tokio::test]
    async fn test_enabled_dependencies_priority_ordering() {
        let root = node("root", "root.rs");
        let low = DependencyNode::new(NodeDescriptor::new("low", "low.rs").priority(1));
        let high = DependencyNode::new(NodeDescriptor::new("high", "high.rs").priority(2));
        let off = DependencyNode::new(
            NodeDescriptor::new("off", "off.rs").options(json!({ "enabled": false })),
        );
        let tie_a = node("tie_a", "tie_a.rs");
        let tie_b = node("tie_b", "tie_b.rs");

        for child in [&low, &high, &off, &tie_a, &tie_b] {
            root.attach_child(Arc::clone(child)).unwrap();
        }

        let names: Vec<String> = root
            .enabled_dependencies()
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        // Descending priority, ties in insertion order, disabled filtered out.
        assert_eq!(names, vec!["high", "low", "tie_a", "tie_b"]);
    }

    #[tokio::test]
    async fn test_find_child_and_find_by_name() {
        let root = node("root", "root.rs");
        let first = node("worker", "workers/first.rs");
        let second = node("worker", "workers/second.rs");
        root.attach_child(Arc::clone(&first)).unwrap();
        root.attach_child(Arc::clone(&second)).unwrap();

        assert!(root.find_child("workers/first.rs").is_some());
        assert!(root.find_child("workers/third.rs").is_none());
        // find_child is not recursive.
        let nested = node("nested", "nested.rs");
        first.attach_child(Arc::clone(&nested)).unwrap();
        assert!(root.find_child("nested.rs").is_none());

        // First match by logical name wins.
        let found = root.find_by_name("worker").unwrap();
        assert_eq!(found.filename(), "workers/first.rs");
    }

    #[tokio::test]
    async fn test_duplicate_filename_attach_fails() {
        let root = node("root", "root.rs");
        root.attach_child(node("a", "same.rs")).unwrap();
        assert!(matches!(
            root.attach_child(node("b", "same.rs")),
            Err(GraphError::DuplicateChild { .. })
        ));
    }

    #[tokio::test]
    async fn test_all_dependencies_excludes_disposed() {
        let root = node("root", "root.rs");
        let a = node("a", "a.rs");
        let b = node("b", "b.rs");
        root.attach_child(Arc::clone(&a)).unwrap();
        root.attach_child(Arc::clone(&b)).unwrap();

        a.dispose().await;
        let names: Vec<String> = root
            .all_dependencies()
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, vec!["root", "b"]);
    }

    #[tokio::test]
    async fn test_update_options_merges_and_emits() {
        let n = DependencyNode::new(
            NodeDescriptor::new("a", "a.rs").options(json!({
                "enabled": true,
                "limits": { "rate": 10, "burst": 5 },
            })),
        );

        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        n.on(names::OPTIONS_CHANGED, move |p| {
            let change = p.downcast_ref::<OptionsChanged>().unwrap();
            *s.lock() = Some(change.options.clone());
        });

        n.update_options(json!({ "limits": { "rate": 20 }, "tag": "x" }));

        let merged = seen.lock().clone().unwrap();
        assert_eq!(
            merged,
            json!({
                "enabled": true,
                "limits": { "rate": 20, "burst": 5 },
                "tag": "x",
            })
        );
        assert!(n.enabled());

        n.update_options(json!({ "enabled": false }));
        assert!(!n.enabled());
    }
}

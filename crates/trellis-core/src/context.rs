//! Named capabilities ("contexts") and the per-node registry that tracks
//! their readiness.
//!
//! A [`Context`] is one named capability a node exposes to its own scope:
//! an async producer that is invoked exactly once while the node mounts,
//! plus an optional teardown callback. The [`ContextRegistry`] keeps the
//! node's contexts in registration order, tracks which of them have
//! resolved, and queues callbacks for consumers that want to run as soon
//! as a capability becomes available.
//!
//! Values are stored type-erased (`Arc<dyn Any + Send + Sync>`) and checked
//! at the lookup site: resolving a known name with the wrong type fails
//! just like resolving an unknown name does.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::error::{BoxError, ContextError};

/// Value produced by a context's mount producer.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

/// Callback queued until a named context becomes ready.
pub type ContextWaiter = Box<dyn FnOnce(ContextValue) + Send>;

/// Async producer stored by a [`Context`]; invoked exactly once per node
/// instance.
pub(crate) type Producer =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<ContextValue, BoxError>> + Send>;

/// Async teardown callback, run in reverse registration order on dispose.
pub(crate) type Disposer = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

// ─── Context ──────────────────────────────────────────────────────────────────

/// One named capability a node exposes to its scope.
///
/// # Example
///
/// ```rust,ignore
/// node.register(
///     Context::new("database", || async {
///         let pool = Pool::connect("sqlite::memory:").await?;
///         Ok(pool)
///     })
///     .on_dispose(|| async { Ok(()) }),
/// )?;
/// ```
pub struct Context {
    name: String,
    producer: Producer,
    disposer: Option<Disposer>,
}

impl Context {
    /// Creates a context whose value is produced asynchronously during mount.
    pub fn new<F, Fut, T>(name: impl Into<String>, producer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            producer: Box::new(move || {
                Box::pin(async move {
                    let value = producer().await?;
                    Ok(Arc::new(value) as ContextValue)
                })
            }),
            disposer: None,
        }
    }

    /// Creates a context whose value is already known at registration time.
    pub fn value<T: Send + Sync + 'static>(name: impl Into<String>, value: T) -> Self {
        Self::new(name, move || async move { Ok::<T, BoxError>(value) })
    }

    /// Attaches a teardown callback, run when the owning node is disposed.
    pub fn on_dispose<F, Fut>(mut self, disposer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.disposer = Some(Box::new(move || Box::pin(disposer())));
        self
    }

    /// The context's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("has_disposer", &self.disposer.is_some())
            .finish()
    }
}

// ─── ContextRegistry ──────────────────────────────────────────────────────────

struct Slot {
    producer: Option<Producer>,
    disposer: Option<Disposer>,
    value: Option<ContextValue>,
    ready: bool,
    waiters: Vec<ContextWaiter>,
}

/// Insertion-ordered map of a node's contexts with readiness tracking.
///
/// The registry itself is not synchronized; the owning node wraps it in its
/// own lock and is the only mutator.
pub struct ContextRegistry {
    slots: IndexMap<String, Slot>,
}

impl ContextRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            slots: IndexMap::new(),
        }
    }

    /// Inserts a context, keyed by its name.
    ///
    /// Registering two contexts of the same name is an error — ambiguous
    /// resolution is rejected instead of silently overwriting.
    pub fn insert(&mut self, context: Context) -> Result<(), ContextError> {
        if self.slots.contains_key(&context.name) {
            return Err(ContextError::Duplicate { name: context.name });
        }
        self.slots.insert(
            context.name,
            Slot {
                producer: Some(context.producer),
                disposer: context.disposer,
                value: None,
                ready: false,
                waiters: Vec::new(),
            },
        );
        Ok(())
    }

    /// Returns `true` if a context with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Non-throwing readiness probe.
    pub fn is_ready(&self, name: &str) -> bool {
        self.slots.get(name).is_some_and(|slot| slot.ready)
    }

    /// Returns the resolved value for `name`.
    pub fn get(&self, name: &str) -> Result<ContextValue, ContextError> {
        let slot = self.slots.get(name).ok_or_else(|| ContextError::Unknown {
            name: name.to_string(),
        })?;
        match &slot.value {
            Some(value) if slot.ready => Ok(Arc::clone(value)),
            _ => Err(ContextError::NotReady {
                name: name.to_string(),
            }),
        }
    }

    /// Queues `waiter` until `name` becomes ready.
    ///
    /// If the context is already ready the waiter is handed back together
    /// with the value so the caller can invoke it outside any lock.
    pub fn when_ready(
        &mut self,
        name: &str,
        waiter: ContextWaiter,
    ) -> Result<Option<(ContextWaiter, ContextValue)>, ContextError> {
        let slot = self
            .slots
            .get_mut(name)
            .ok_or_else(|| ContextError::Unknown {
                name: name.to_string(),
            })?;
        match &slot.value {
            Some(value) if slot.ready => Ok(Some((waiter, Arc::clone(value)))),
            _ => {
                slot.waiters.push(waiter);
                Ok(None)
            }
        }
    }

    /// Takes every pending producer, in registration order.
    pub(crate) fn take_producers(&mut self) -> Vec<(String, Producer)> {
        self.slots
            .iter_mut()
            .filter_map(|(name, slot)| slot.producer.take().map(|p| (name.clone(), p)))
            .collect()
    }

    /// Stores the produced value and marks the context ready.
    pub(crate) fn fulfill(&mut self, name: &str, value: ContextValue) {
        if let Some(slot) = self.slots.get_mut(name) {
            slot.value = Some(value);
            slot.ready = true;
        }
    }

    /// Drains the waiters of every ready context, pairing each with its value.
    pub(crate) fn drain_ready_waiters(&mut self) -> Vec<(ContextWaiter, ContextValue)> {
        let mut drained = Vec::new();
        for slot in self.slots.values_mut() {
            if !slot.ready {
                continue;
            }
            if let Some(value) = &slot.value {
                for waiter in slot.waiters.drain(..) {
                    drained.push((waiter, Arc::clone(value)));
                }
            }
        }
        drained
    }

    /// Takes every teardown callback, in **reverse** registration order.
    pub(crate) fn take_disposers(&mut self) -> Vec<(String, Disposer)> {
        let mut disposers: Vec<(String, Disposer)> = self
            .slots
            .iter_mut()
            .filter_map(|(name, slot)| slot.disposer.take().map(|d| (name.clone(), d)))
            .collect();
        disposers.reverse();
        disposers
    }

    /// Number of registered contexts.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when no contexts are registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    /// Drops every slot, including queued waiters.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("contexts", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(registry: &mut ContextRegistry) {
        for (name, producer) in registry.take_producers() {
            let value = futures::executor::block_on(producer()).expect("producer failed");
            registry.fulfill(&name, value);
        }
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut registry = ContextRegistry::new();
        registry.insert(Context::value("db", 1u32)).unwrap();
        let err = registry.insert(Context::value("db", 2u32)).unwrap_err();
        assert!(matches!(err, ContextError::Duplicate { name } if name == "db"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_unknown_and_unready() {
        let mut registry = ContextRegistry::new();
        registry.insert(Context::value("db", 1u32)).unwrap();

        assert!(matches!(
            registry.get("nope"),
            Err(ContextError::Unknown { .. })
        ));
        assert!(matches!(
            registry.get("db"),
            Err(ContextError::NotReady { .. })
        ));
        assert!(!registry.is_ready("db"));

        mount(&mut registry);
        assert!(registry.is_ready("db"));
        let value = registry.get("db").unwrap();
        assert_eq!(*value.downcast::<u32>().unwrap(), 1);
    }

    #[test]
    fn test_when_ready_queues_then_hands_back() {
        let mut registry = ContextRegistry::new();
        registry.insert(Context::value("db", 7u32)).unwrap();

        // Not ready yet: waiter is queued.
        let queued = registry
            .when_ready("db", Box::new(|_| {}))
            .expect("known name");
        assert!(queued.is_none());

        mount(&mut registry);

        // Ready: waiter comes straight back with the value.
        let immediate = registry
            .when_ready("db", Box::new(|_| {}))
            .expect("known name")
            .expect("ready");
        assert_eq!(*immediate.1.downcast::<u32>().unwrap(), 7);

        // The queued waiter is drained exactly once.
        assert_eq!(registry.drain_ready_waiters().len(), 1);
        assert!(registry.drain_ready_waiters().is_empty());
    }

    #[test]
    fn test_disposers_run_in_reverse_order() {
        let mut registry = ContextRegistry::new();
        for name in ["a", "b", "c"] {
            registry
                .insert(Context::value(name, ()).on_dispose(move || async move { Ok(()) }))
                .unwrap();
        }
        let order: Vec<String> = registry
            .take_disposers()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }
}

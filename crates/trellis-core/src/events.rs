//! Intra-node event bus.
//!
//! Every [`DependencyNode`](crate::node::DependencyNode) embeds an
//! [`Emitter`]: an insertion-ordered listener table keyed by event name.
//! The node layers two propagation primitives on top of it — `broadcast`
//! (top-down, pre-order) and `dispatch` (bottom-up, one hop to the parent) —
//! while the emitter itself stays strictly local.
//!
//! Payloads are type-erased (`Arc<dyn Any + Send + Sync>`): an emitter does
//! not know what its events carry, listeners downcast to the payload type
//! they expect. Listener invocation is synchronous and happens in
//! registration order.
//!
//! # Example
//!
//! ```rust,ignore
//! let emitter = Emitter::new();
//! emitter.on("message.receive", |payload| {
//!     if let Some(text) = payload.downcast_ref::<String>() {
//!         println!("got: {text}");
//!     }
//! });
//! emitter.emit("message.receive", payload("hello".to_string()));
//! ```

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Type-erased payload delivered to event listeners.
pub type EventPayload = Arc<dyn Any + Send + Sync>;

/// A registered event listener.
pub type EventHandler = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// Wraps a value into an [`EventPayload`].
pub fn payload<T: Send + Sync + 'static>(value: T) -> EventPayload {
    Arc::new(value)
}

/// Well-known event names emitted by the core graph.
pub mod names {
    /// Emitted by a disposing node right before its listener table is torn
    /// down, so observers can still react to the teardown.
    pub const DISPOSE: &str = "self.dispose";
    /// Emitted on every lifecycle transition; carries
    /// `node::LifecycleChanged`.
    pub const LIFECYCLE_CHANGED: &str = "lifecycle-changed";
    /// Emitted after an options merge; carries `node::OptionsChanged`.
    pub const OPTIONS_CHANGED: &str = "options.changed";
}

/// Handle returned by [`Emitter::on`]; pass it to [`Emitter::off`] to remove
/// the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct EmitterInner {
    listeners: IndexMap<String, Vec<(ListenerId, EventHandler)>>,
    next_id: u64,
    closed: bool,
}

/// Insertion-ordered pub/sub listener table.
///
/// Once [`close`](Emitter::close) has been called the emitter is inert:
/// nothing fires any more and registrations are silently discarded. This is
/// what guarantees that a disposed node's listeners never run again, even
/// when a listener is registered from inside a disposal-triggered cascade.
pub struct Emitter {
    inner: Mutex<EmitterInner>,
}

impl Emitter {
    /// Creates an empty emitter.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EmitterInner {
                listeners: IndexMap::new(),
                next_id: 0,
                closed: false,
            }),
        }
    }

    /// A payload carrying no data.
    pub fn unit() -> EventPayload {
        Arc::new(())
    }

    /// Registers `handler` for `event` and returns its removal handle.
    ///
    /// On a closed emitter the returned handle refers to nothing and the
    /// handler will never fire.
    pub fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        if !inner.closed {
            inner
                .listeners
                .entry(event.to_string())
                .or_default()
                .push((id, Arc::new(handler)));
        }
        id
    }

    /// Removes a listener previously registered with [`on`](Emitter::on).
    ///
    /// Returns `true` if the listener was found and removed.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let Some(list) = inner.listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        list.len() != before
    }

    /// Invokes every listener for `event`, in registration order.
    ///
    /// Handlers run outside the internal lock, so a handler may freely
    /// re-enter the emitter (emit, register, remove).
    pub fn emit(&self, event: &str, payload: EventPayload) {
        let handlers: Vec<EventHandler> = {
            let inner = self.inner.lock();
            if inner.closed {
                return;
            }
            match inner.listeners.get(event) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return,
            }
        };
        for handler in handlers {
            handler(&payload);
        }
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .lock()
            .listeners
            .get(event)
            .map_or(0, |list| list.len())
    }

    /// Total number of listeners across all events.
    pub fn total_listeners(&self) -> usize {
        self.inner
            .lock()
            .listeners
            .values()
            .map(|list| list.len())
            .sum()
    }

    /// Detaches every listener and marks the emitter inert.
    ///
    /// Subsequent `emit` calls deliver nothing and subsequent `on` calls are
    /// discarded. Closing twice is a no-op.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.listeners.clear();
    }

    /// Returns `true` once [`close`](Emitter::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Emitter")
            .field("events", &inner.listeners.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

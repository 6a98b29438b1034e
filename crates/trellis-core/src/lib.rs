//! # Trellis Core
//!
//! The dependency-graph core of the Trellis plugin runtime: a hierarchy of
//! [`DependencyNode`]s with a forward-only lifecycle state machine, named
//! capability resolution ("contexts"), and bidirectional event propagation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐  broadcast (top-down, pre-order)
//! │   root node    │ ─────────────────────────────────▶ descendants
//! │  (host-owned)  │
//! └───────┬────────┘
//!         │ children: filename → Arc<DependencyNode>
//!   ┌─────┴──────┐        ◀───── dispatch (one hop up)
//!   │ plugin "a" │── contexts: name → capability (mounted once, torn down
//!   │ plugin "b" │                in reverse registration order)
//!   └────────────┘
//! ```
//!
//! - Parents own children strongly; children hold a weak back-pointer, so
//!   the graph has no strong cycles.
//! - A node's lifecycle only moves forward: `waiting → ready → disposed`.
//! - `resolve` never serves partial state: it fails until the whole mount
//!   has settled.
//!
//! Loading units from the file system and swapping them live is the job of
//! the `trellis-loader` crate; host orchestration lives in
//! `trellis-runtime`.

pub mod context;
pub mod error;
pub mod events;
pub mod node;

// Re-exports
pub use context::{Context, ContextRegistry, ContextValue, ContextWaiter};
pub use error::{BoxError, ContextError, GraphError, MountError};
pub use events::{Emitter, EventHandler, EventPayload, ListenerId, names, payload};
pub use node::{
    DependencyNode, LifecycleChanged, LifecycleState, NodeDescriptor, OptionsChanged,
};

//! Error types for the Trellis core graph.

use thiserror::Error;

/// Boxed error carried by context producers and dispose callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by context registration and lookup.
///
/// All variants are synchronous and returned to the immediate caller; none of
/// them leave the node in a partially mutated state.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A context with the same name is already registered on this node.
    #[error("context '{name}' is already registered on this node")]
    Duplicate {
        /// Name of the colliding context.
        name: String,
    },

    /// No context with this name exists on the node.
    #[error("unknown context '{name}'")]
    Unknown {
        /// The requested name.
        name: String,
    },

    /// The context (or the node itself) has not finished mounting.
    #[error("context '{name}' is not ready")]
    NotReady {
        /// The requested name.
        name: String,
    },

    /// The stored value is not of the requested type.
    #[error("context '{name}' holds a value of a different type (expected {expected})")]
    TypeMismatch {
        /// The requested name.
        name: String,
        /// Type the caller asked for.
        expected: &'static str,
    },

    /// Registration happened after the node already started (or finished) mounting.
    #[error("cannot register context '{name}': node has already been mounted")]
    RegisteredAfterMount {
        /// Name of the rejected context.
        name: String,
    },

    /// The node has been disposed.
    #[error("node is disposed")]
    Disposed,
}

/// Errors surfaced by [`DependencyNode::mounted`](crate::node::DependencyNode::mounted).
///
/// A mount failure never marks the node ready: the node stays in the waiting
/// state (or finalizes a dispose that was requested mid-mount).
#[derive(Debug, Error)]
pub enum MountError {
    /// `mounted()` was called a second time.
    #[error("node '{node}' has already been mounted")]
    AlreadyMounted {
        /// Logical name of the node.
        node: String,
    },

    /// `mounted()` was called on a disposed node.
    #[error("node '{node}' is disposed")]
    Disposed {
        /// Logical name of the node.
        node: String,
    },

    /// A context producer failed while resolving.
    #[error("context '{context}' failed to mount: {source}")]
    Producer {
        /// Name of the failing context.
        context: String,
        /// The producer's error.
        #[source]
        source: BoxError,
    },

    /// A dispose was requested while producers were still resolving; the node
    /// finished tearing down instead of becoming ready.
    #[error("node '{node}' was disposed while mounting")]
    DisposedWhileMounting {
        /// Logical name of the node.
        node: String,
    },
}

/// Errors raised by graph-edge mutations (attach/detach of children).
#[derive(Debug, Error)]
pub enum GraphError {
    /// The parent already owns a child registered under this filename.
    #[error("a child with filename '{filename}' is already attached")]
    DuplicateChild {
        /// The colliding filename.
        filename: String,
    },

    /// Either endpoint of the edge has been disposed.
    #[error("cannot attach '{filename}': node is disposed")]
    Disposed {
        /// Filename of the child involved.
        filename: String,
    },
}

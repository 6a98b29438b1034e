//! Loader error types.

use std::path::PathBuf;

use thiserror::Error;

use trellis_core::{BoxError, GraphError, MountError};

/// Errors surfaced by the [`ModuleLoader`](crate::loader::ModuleLoader).
///
/// Every variant is also emitted on the loader's `error` event, so tooling
/// that only observes the event funnel sees the same failures callers do.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Reading the module source failed (missing file, permissions, ...).
    #[error("failed to read module source at {path}: {source}")]
    Io {
        /// The tracked path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The host's factory failed to materialize a node for the source.
    #[error("failed to resolve module at {path}: {source}")]
    Resolve {
        /// The tracked path.
        path: PathBuf,
        /// The factory's error.
        #[source]
        source: BoxError,
    },

    /// Attaching the new node to the graph failed.
    #[error("failed to attach module at {path}: {source}")]
    Attach {
        /// The tracked path.
        path: PathBuf,
        /// Underlying graph error.
        #[source]
        source: GraphError,
    },

    /// The node's mount failed; the partial attach was rolled back.
    #[error("failed to mount module at {path}: {source}")]
    Mount {
        /// The tracked path.
        path: PathBuf,
        /// Underlying mount error.
        #[source]
        source: MountError,
    },

    /// `add` was called for a path that already has a live node.
    #[error("module at {path} is already loaded")]
    AlreadyLoaded {
        /// The tracked path.
        path: PathBuf,
    },

    /// The path is not in the loader's tracked set.
    #[error("no module tracked at {path}")]
    NotTracked {
        /// The requested path.
        path: PathBuf,
    },

    /// The loader itself has been disposed.
    #[error("module loader is disposed")]
    Disposed,

    /// Starting or updating the file watcher failed.
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

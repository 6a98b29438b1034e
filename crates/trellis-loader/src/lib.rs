//! # Trellis Loader
//!
//! The bridge between external source units and the live dependency graph.
//!
//! The loader tracks a set of source paths, turns each into a
//! `DependencyNode` through a host-supplied [`DependencyFactory`], and keeps
//! the graph reconciled as sources change: content-fingerprinted reloads,
//! dispose-before-mount swap ordering, and a single `error` event funnel
//! for everything that goes wrong.
//!
//! ```rust,ignore
//! let loader = ModuleLoader::new(root, Arc::new(MyFactory));
//! loader.add("plugins/echo.rs").await?;
//! loader.watch()?; // live edits now reload the module in place
//! ```

pub mod error;
pub mod fingerprint;
pub mod loader;

mod watcher;

// Re-exports
pub use error::{LoaderError, LoaderResult};
pub use fingerprint::{Fingerprint, fingerprint};
pub use loader::{DependencyFactory, LoaderFailure, ModuleEvent, ModuleLoader, events};

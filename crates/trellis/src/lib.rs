//! # Trellis
//!
//! A hot-reloadable dependency/plugin runtime for Rust: independently
//! loadable units become a live, hierarchical graph with managed lifecycle,
//! named capability ("context") resolution, and bidirectional event
//! propagation — plus a loader that watches source locations and swaps
//! running instances without restarting the host process.
//!
//! ## Architecture
//!
//! ```text
//! file change ──▶ ModuleLoader ──▶ dispose old node (children first)
//!                                   └▶ resolve source ──▶ new DependencyNode
//!                                        └▶ attach ──▶ mounted() ──▶ contexts ready
//! ```
//!
//! - **DependencyNode** (`trellis-core`): one loadable unit — lifecycle
//!   state machine, children, contexts, event emitter.
//! - **ModuleLoader** (`trellis-loader`): maps source-change signals to
//!   graph mutations with dispose-before-mount ordering and content
//!   fingerprinting.
//! - **TrellisRuntime** (`trellis-runtime`): configuration, logging, and
//!   the host shell owning the root node.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! struct MyFactory;
//!
//! #[async_trait::async_trait]
//! impl DependencyFactory for MyFactory {
//!     async fn create_dependency(
//!         &self,
//!         path: &Path,
//!         source: &[u8],
//!     ) -> Result<Arc<DependencyNode>, BoxError> {
//!         let node = DependencyNode::new(NodeDescriptor::new("echo", path.to_string_lossy()));
//!         node.register(Context::value("greeting", "hello".to_string()))?;
//!         Ok(node)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?;
//!     logging::init_from_config(&config.logging);
//!     let runtime = TrellisRuntime::new(config, Arc::new(MyFactory));
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub use trellis_core as core;
pub use trellis_loader as loader;
pub use trellis_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use trellis_runtime::{ConfigLoader, TrellisConfig, TrellisRuntime, logging};

    // Graph core - nodes, contexts, lifecycle
    pub use trellis_core::{
        BoxError, Context, ContextError, DependencyNode, LifecycleState, MountError,
        NodeDescriptor,
    };

    // Event system
    pub use trellis_core::{EventPayload, ListenerId, names, payload};

    // Loader - module tracking and hot reload
    pub use trellis_loader::{DependencyFactory, LoaderError, ModuleLoader};
}

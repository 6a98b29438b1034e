//! Runtime orchestration: the host shell that owns the root node and the
//! module loader.
//!
//! [`TrellisRuntime`] wires the pieces together: it constructs the root
//! [`DependencyNode`], hands a host-supplied [`DependencyFactory`] to a
//! [`ModuleLoader`] scoped under that root, loads the configured module
//! paths, and optionally starts file watching. Shutdown is a dispose of the
//! root (which cascades through the whole graph) followed by a dispose of
//! the loader.
//!
//! The runtime is an explicit, injectable object — no ambient globals — so
//! tests construct isolated instances.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_runtime::{ConfigLoader, TrellisRuntime, logging};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let runtime = TrellisRuntime::new(config, Arc::new(MyFactory));
//!     runtime.run().await?; // starts, parks on ctrl-c, shuts down
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tracing::{error, info};

use trellis_core::{DependencyNode, LifecycleState};
use trellis_loader::{DependencyFactory, ModuleLoader};

use crate::config::TrellisConfig;
use crate::error::{RuntimeError, RuntimeResult};

/// The host runtime: root node + module loader + configuration.
pub struct TrellisRuntime {
    config: TrellisConfig,
    root: Arc<DependencyNode>,
    loader: Arc<ModuleLoader>,
}

impl TrellisRuntime {
    /// Creates a runtime with the given configuration and node factory.
    pub fn new(config: TrellisConfig, factory: Arc<dyn DependencyFactory>) -> Self {
        let root = DependencyNode::root("trellis");
        let loader = ModuleLoader::new(Arc::clone(&root), factory);
        Self {
            config,
            root,
            loader,
        }
    }

    /// The root of the dependency graph.
    pub fn root(&self) -> &Arc<DependencyNode> {
        &self.root
    }

    /// The module loader.
    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    /// The resolved configuration.
    pub fn config(&self) -> &TrellisConfig {
        &self.config
    }

    /// Mounts the root and loads every configured module path.
    ///
    /// A module that fails to load is reported (log + the loader's `error`
    /// event) and skipped; one bad module does not prevent startup.
    pub async fn start(&self) -> RuntimeResult<()> {
        if self.root.lifecycle_state() == LifecycleState::Waiting {
            self.root.mounted().await.map_err(RuntimeError::Root)?;
        }

        for path in &self.config.modules.paths {
            if let Err(e) = self.loader.add(path).await {
                error!(path = %path.display(), error = %e, "Module failed to load, continuing");
            }
        }

        if self.config.modules.watch {
            self.loader.watch()?;
        }

        info!(
            modules = self.loader.live_count(),
            watching = self.loader.is_watching(),
            "Runtime started"
        );
        Ok(())
    }

    /// Starts the runtime and parks until a shutdown signal arrives, then
    /// shuts down.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        tokio::signal::ctrl_c()
            .await
            .map_err(RuntimeError::Signal)?;
        info!("Shutdown signal received");
        self.shutdown().await;
        Ok(())
    }

    /// Disposes the graph (root first, cascading through every node), then
    /// the loader. Idempotent.
    pub async fn shutdown(&self) {
        self.root.dispose().await;
        self.loader.dispose();
        info!("Runtime stopped");
    }

    /// Snapshot of the graph and loader state for diagnostics.
    pub fn stats(&self) -> RuntimeStats {
        let nodes = self.root.all_dependencies();
        let ready = nodes
            .iter()
            .filter(|n| n.lifecycle_state() == LifecycleState::Ready)
            .count();
        RuntimeStats {
            total_nodes: nodes.len(),
            ready_nodes: ready,
            waiting_nodes: nodes.len() - ready,
            tracked_modules: self.loader.module_count(),
            live_modules: self.loader.live_count(),
        }
    }
}

/// Statistics about the running graph.
#[derive(Debug, Clone, Default)]
pub struct RuntimeStats {
    /// Nodes in the graph (root included), disposed ones excluded.
    pub total_nodes: usize,
    /// Nodes currently ready.
    pub ready_nodes: usize,
    /// Nodes still waiting.
    pub waiting_nodes: usize,
    /// Paths tracked by the loader.
    pub tracked_modules: usize,
    /// Tracked paths with a live node.
    pub live_modules: usize,
}

impl std::fmt::Display for RuntimeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Nodes: {} total ({} ready, {} waiting), modules: {} tracked ({} live)",
            self.total_nodes,
            self.ready_nodes,
            self.waiting_nodes,
            self.tracked_modules,
            self.live_modules
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use trellis_core::{BoxError, Context, NodeDescriptor};

    struct EchoFactory;

    #[async_trait]
    impl DependencyFactory for EchoFactory {
        async fn create_dependency(
            &self,
            path: &Path,
            source: &[u8],
        ) -> Result<Arc<DependencyNode>, BoxError> {
            let text = String::from_utf8_lossy(source).into_owned();
            let node = DependencyNode::new(NodeDescriptor::new("echo", path.to_string_lossy()));
            node.register(Context::value("source", text))?;
            Ok(node)
        }
    }

    fn config_with(paths: Vec<PathBuf>, watch: bool) -> TrellisConfig {
        let mut config = TrellisConfig::default();
        config.modules.paths = paths;
        config.modules.watch = watch;
        config
    }

    #[tokio::test]
    async fn test_start_loads_configured_modules() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("echo.rs");
        std::fs::write(&path, "hello").unwrap();

        let runtime = TrellisRuntime::new(config_with(vec![path.clone()], false), Arc::new(EchoFactory));
        runtime.start().await.unwrap();

        assert_eq!(runtime.root().lifecycle_state(), LifecycleState::Ready);
        let node = runtime.loader().node_for(&path).unwrap();
        assert_eq!(*node.resolve::<String>("source").unwrap(), "hello");

        let stats = runtime.stats();
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.ready_nodes, 2);
        assert_eq!(stats.live_modules, 1);
    }

    #[tokio::test]
    async fn test_bad_module_does_not_prevent_startup() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.rs");
        std::fs::write(&good, "ok").unwrap();
        let missing = dir.path().join("missing.rs");

        let runtime = TrellisRuntime::new(
            config_with(vec![missing, good.clone()], false),
            Arc::new(EchoFactory),
        );
        runtime.start().await.unwrap();

        assert!(runtime.loader().node_for(&good).is_some());
        assert_eq!(runtime.stats().live_modules, 1);
    }

    #[tokio::test]
    async fn test_shutdown_cascades_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("echo.rs");
        std::fs::write(&path, "hello").unwrap();

        let runtime = TrellisRuntime::new(config_with(vec![path.clone()], false), Arc::new(EchoFactory));
        runtime.start().await.unwrap();
        let node = runtime.loader().node_for(&path).unwrap();

        runtime.shutdown().await;
        runtime.shutdown().await;

        assert_eq!(runtime.root().lifecycle_state(), LifecycleState::Disposed);
        assert_eq!(node.lifecycle_state(), LifecycleState::Disposed);
        assert_eq!(runtime.stats().total_nodes, 0);
    }
}

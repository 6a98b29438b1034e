//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;
use trellis_core::MountError;
use trellis_loader::LoaderError;

/// Errors that can occur during runtime orchestration.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration loading or validation failed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The root node failed to mount.
    #[error("root node failed to mount: {0}")]
    Root(#[from] MountError),

    /// A loader operation failed.
    #[error("loader error: {0}")]
    Loader(#[from] LoaderError),

    /// Installing the shutdown signal handler failed.
    #[error("failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

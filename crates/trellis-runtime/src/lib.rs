//! Trellis Runtime - Orchestration layer for the Trellis plugin runtime.
//!
//! This crate provides:
//! - Layered configuration loading (`TrellisConfig`, `ConfigLoader`)
//! - Logging configuration (`LoggingBuilder`)
//! - Host orchestration (`TrellisRuntime`): root node, module loader,
//!   startup and cascading shutdown
//!
//! ```ignore
//! use trellis_runtime::{ConfigLoader, TrellisRuntime, logging};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let runtime = TrellisRuntime::new(config, Arc::new(MyFactory));
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, LogFormat, LoggingConfig, ModulesConfig,
    TrellisConfig, load_config,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{RuntimeStats, TrellisRuntime};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}

//! Logging setup for the Trellis runtime.
//!
//! A thin builder over `tracing-subscriber`: filter directives, output
//! format, and timestamp toggling, initialized either manually or straight
//! from a [`LoggingConfig`].
//!
//! # Configuration-Based Initialization
//!
//! ```rust,ignore
//! let config = trellis_runtime::config::load_config()?;
//! trellis_runtime::logging::init_from_config(&config.logging);
//! ```
//!
//! # Manual Initialization
//!
//! ```rust,ignore
//! use trellis_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::new().directive("trellis=debug").init();
//! ```

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Error returned when installing the global subscriber fails.
pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Builder for the process-wide tracing subscriber.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    format: LogFormat,
    timestamps: bool,
}

impl LoggingBuilder {
    /// Creates a builder with compact output and timestamps enabled.
    pub fn new() -> Self {
        Self {
            directives: Vec::new(),
            format: LogFormat::Compact,
            timestamps: true,
        }
    }

    /// Adds a filter directive (e.g. `"info"`, `"trellis=debug"`).
    ///
    /// When no directive is given, `RUST_LOG` is consulted, falling back to
    /// `info`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Sets the output format.
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enables or disables timestamps on log lines.
    pub fn timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Attempts to install the subscriber as the global default.
    pub fn try_init(self) -> Result<(), InitError> {
        let filter = if self.directives.is_empty() {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        } else {
            EnvFilter::new(self.directives.join(","))
        };

        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        match (self.format, self.timestamps) {
            (LogFormat::Pretty, true) => builder.pretty().try_init(),
            (LogFormat::Pretty, false) => builder.pretty().without_time().try_init(),
            (LogFormat::Compact, true) => builder.compact().try_init(),
            (LogFormat::Compact, false) => builder.compact().without_time().try_init(),
        }
    }

    /// Installs the subscriber, reporting a failure to stderr instead of
    /// panicking (a second initialization in tests is harmless).
    pub fn init(self) {
        if let Err(e) = self.try_init() {
            eprintln!("trellis: failed to initialize logging: {e}");
        }
    }
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes logging from a [`LoggingConfig`] section.
pub fn init_from_config(config: &LoggingConfig) {
    LoggingBuilder::new()
        .directive(config.level.clone())
        .format(config.format)
        .timestamps(config.timestamps)
        .init();
}

//! Configuration loading for the Trellis runtime.
//!
//! Configuration is layered with figment, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. `trellis.toml` (or an explicit file passed to [`ConfigLoader::file`])
//! 3. Environment variables (`TRELLIS_*`, `__` as section separator)
//!
//! # Environment Variable Mapping
//!
//! - `TRELLIS_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `TRELLIS_MODULES__WATCH=true` → `modules.watch = true`
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ConfigLoader::new().file("./trellis.toml").load()?;
//! ```

use std::path::PathBuf;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default config file searched in the working directory.
const DEFAULT_CONFIG_FILE: &str = "trellis.toml";

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Extraction or merging failed.
    #[error("failed to load configuration: {0}")]
    Figment(#[from] Box<figment::Error>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrellisConfig {
    /// Module tracking and hot-reload settings.
    #[serde(default)]
    pub modules: ModulesConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Module tracking and hot-reload settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModulesConfig {
    /// Source paths loaded at startup.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Whether to watch loaded sources and hot-swap them on change.
    #[serde(default)]
    pub watch: bool,
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line output.
    #[default]
    Compact,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive(s), e.g. `info` or `trellis=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Whether log lines carry timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Layered configuration loader.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env: bool,
}

impl ConfigLoader {
    /// Creates a loader with defaults, the standard file location, and
    /// environment overrides enabled.
    pub fn new() -> Self {
        Self {
            file: None,
            env: true,
        }
    }

    /// Loads from a specific file instead of `trellis.toml`.
    ///
    /// Unlike the default search, an explicitly requested file must exist.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Disables the `TRELLIS_*` environment layer.
    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Resolves the layered configuration.
    pub fn load(self) -> ConfigResult<TrellisConfig> {
        let mut figment = Figment::from(Serialized::defaults(TrellisConfig::default()));

        match &self.file {
            Some(file) => {
                if !file.exists() {
                    return Err(ConfigError::FileNotFound(file.clone()));
                }
                debug!(file = %file.display(), "Loading configuration file");
                figment = figment.merge(Toml::file(file));
            }
            None => {
                figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
            }
        }

        if self.env {
            figment = figment.merge(Env::prefixed("TRELLIS_").split("__"));
        }

        figment.extract().map_err(|e| ConfigError::from(Box::new(e)))
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<TrellisConfig> {
    ConfigLoader::new().load()
}

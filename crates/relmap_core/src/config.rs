//! Engine configuration.
//!
//! # Responsibility
//! - Hold tunables shared by store bootstrap, engines and logging.
//! - Load them from JSON documents with defaults for absent keys.
//!
//! # Invariants
//! - A validated config never carries zero timeouts or a zero cascade depth.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CASCADE_DEPTH: usize = 32;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot read config: {err}"),
            Self::Json(err) => write!(f, "invalid config document: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// File logging settings consumed by `logging::init_logging`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of `trace|debug|info|warn|error`.
    pub level: String,
    /// Absolute directory for rolling log files.
    pub directory: String,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Statement timeout used when a command declares none.
    pub default_timeout_ms: u64,
    /// Busy timeout applied when the store is opened.
    pub busy_timeout_ms: u64,
    /// Deepest relationship level a cascade or include may reach.
    pub max_cascade_depth: usize,
    pub logging: Option<LoggingConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_STATEMENT_TIMEOUT_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
            logging: None,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(document: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_json_str(&document)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_timeout_ms must be positive".to_string(),
            ));
        }
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "busy_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_cascade_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_cascade_depth must be positive".to_string(),
            ));
        }
        if let Some(logging) = &self.logging {
            if logging.directory.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "logging.directory cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

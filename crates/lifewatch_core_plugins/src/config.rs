//! Configuration loading.
//!
//! [`WatchConfig`] gathers the knobs a host usually wants to set without
//! recompiling: the dispatch policy, which watchers are active, and how
//! logging looks. It is read from TOML and may be overridden from the
//! environment:
//!
//! | Variable | Overrides | Values |
//! |----------|-----------|--------|
//! | `LIFEWATCH_DISPATCH` | `dispatch` | `propagate`, `isolate` |
//! | `LIFEWATCH_WATCHERS` | `watchers` | comma-separated names; empty clears the list |
//! | `LIFEWATCH_LOG_LEVEL` | `logging.level` | `trace` .. `error` |
//! | `LIFEWATCH_LOG_FORMAT` | `logging.format` | `pretty`, `compact`, `json` |
//!
//! # Example
//!
//! ```
//! use lifewatch_core_plugins::{DispatchMode, WatchConfig};
//!
//! let config = WatchConfig::from_toml_str(r#"
//!     dispatch = "isolate"
//!     watchers = ["logging"]
//!
//!     [logging]
//!     level = "debug"
//!     format = "compact"
//! "#).unwrap();
//!
//! assert_eq!(config.dispatch, DispatchMode::Isolate);
//! assert_eq!(config.watchers.as_deref(), Some(&["logging".to_owned()][..]));
//! ```

use core::fmt;
use core::str::FromStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lifewatch_watch::{
    DispatchPolicy, Interceptor, InventorySource, RunnerResolver, WatcherRegistry,
    WatcherRegistryBuilder,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::tracing_setup::{TracingConfig, TracingFormat, init_tracing};

/// Environment variable overriding [`WatchConfig::dispatch`].
pub const ENV_DISPATCH: &str = "LIFEWATCH_DISPATCH";
/// Environment variable overriding [`WatchConfig::watchers`].
pub const ENV_WATCHERS: &str = "LIFEWATCH_WATCHERS";
/// Environment variable overriding [`LoggingConfig::level`].
pub const ENV_LOG_LEVEL: &str = "LIFEWATCH_LOG_LEVEL";
/// Environment variable overriding [`LoggingConfig::format`].
pub const ENV_LOG_FORMAT: &str = "LIFEWATCH_LOG_FORMAT";

// ─────────────────────────────────────────────────────────────────────────────
// ConfigError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        /// The file that was being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML or does not match the schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override holds a value that cannot be used.
    #[error("invalid value {value:?} in {var}, expected {expected}")]
    InvalidEnv {
        /// The environment variable.
        var: &'static str,
        /// The rejected value.
        value: String,
        /// What would have been accepted.
        expected: &'static str,
    },

    /// `logging.level` does not name a tracing level.
    #[error("unknown log level {0:?}")]
    UnknownLevel(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// DispatchMode
// ─────────────────────────────────────────────────────────────────────────────

/// Serializable form of [`DispatchPolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// See [`DispatchPolicy::Propagate`].
    #[default]
    Propagate,
    /// See [`DispatchPolicy::Isolate`].
    Isolate,
}

impl From<DispatchMode> for DispatchPolicy {
    fn from(mode: DispatchMode) -> Self {
        match mode {
            DispatchMode::Propagate => Self::Propagate,
            DispatchMode::Isolate => Self::Isolate,
        }
    }
}

impl FromStr for DispatchMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "propagate" => Ok(Self::Propagate),
            "isolate" => Ok(Self::Isolate),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Propagate => "propagate",
            Self::Isolate => "isolate",
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LoggingConfig
// ─────────────────────────────────────────────────────────────────────────────

/// The `[logging]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Maximum log level name, e.g. `"info"`.
    pub level: String,
    /// Output format.
    pub format: TracingFormat,
    /// Optional `EnvFilter` directives.
    pub env_filter: Option<String>,
    /// Whether span enter/exit events are printed.
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: TracingFormat::default(),
            env_filter: None,
            span_events: false,
        }
    }
}

impl LoggingConfig {
    /// Converts to a [`TracingConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownLevel`] if `level` is not a tracing level.
    pub fn tracing_config(&self) -> Result<TracingConfig, ConfigError> {
        let level = Level::from_str(self.level.trim())
            .map_err(|_| ConfigError::UnknownLevel(self.level.clone()))?;

        let mut config = TracingConfig::new()
            .with_level(level)
            .with_format(self.format)
            .with_span_events(self.span_events);
        if let Some(filter) = &self.env_filter {
            config = config.with_env_filter(filter.clone());
        }
        Ok(config)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WatchConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level configuration.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// What happens when a watcher panics.
    pub dispatch: DispatchMode,
    /// Names of the watchers to activate. `None` activates all of them.
    pub watchers: Option<Vec<String>>,
    /// Logging setup.
    pub logging: LoggingConfig,
}

impl WatchConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is malformed or has
    /// unknown keys.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is not a valid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for an unusable override. The
    /// configuration may be partially updated in that case.
    pub fn merge_with_env(&mut self) -> Result<(), ConfigError> {
        self.merge_with_vars(|var| std::env::var(var).ok())
    }

    /// Applies overrides looked up through `lookup` instead of the process
    /// environment.
    ///
    /// # Errors
    ///
    /// See [`merge_with_env`](Self::merge_with_env).
    pub fn merge_with_vars(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_DISPATCH) {
            self.dispatch = value.parse().map_err(|()| ConfigError::InvalidEnv {
                var: ENV_DISPATCH,
                value: value.clone(),
                expected: "propagate or isolate",
            })?;
        }

        if let Some(value) = lookup(ENV_WATCHERS) {
            let names: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect();
            self.watchers = (!names.is_empty()).then_some(names);
        }

        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            if Level::from_str(value.trim()).is_err() {
                return Err(ConfigError::InvalidEnv {
                    var: ENV_LOG_LEVEL,
                    value,
                    expected: "trace, debug, info, warn or error",
                });
            }
            self.logging.level = value.trim().to_owned();
        }

        if let Some(value) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_LOG_FORMAT,
                value: value.clone(),
                expected: "pretty, compact or json",
            })?;
        }

        Ok(())
    }

    /// Returns the dispatch policy.
    #[must_use]
    pub fn policy(&self) -> DispatchPolicy {
        self.dispatch.into()
    }

    /// Installs the configured tracing subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownLevel`] if the log level is invalid.
    pub fn init_tracing(&self) -> Result<(), ConfigError> {
        init_tracing(&self.logging.tracing_config()?);
        Ok(())
    }

    /// Builds an interceptor whose watchers are discovered at link time.
    #[must_use]
    pub fn interceptor(&self, resolver: Arc<dyn RunnerResolver>) -> Interceptor {
        self.interceptor_with(WatcherRegistry::builder(), resolver)
    }

    /// Builds an interceptor from `registry`, with link-time discovery added
    /// after whatever `registry` already holds.
    ///
    /// The allow-list applies to every watcher, explicit or discovered.
    #[must_use]
    pub fn interceptor_with(
        &self,
        mut registry: WatcherRegistryBuilder,
        resolver: Arc<dyn RunnerResolver>,
    ) -> Interceptor {
        registry.add_source(InventorySource);
        if let Some(names) = &self.watchers {
            registry.allow_only(names.iter().cloned());
        }

        tracing::debug!(
            dispatch = %self.dispatch,
            watchers = ?self.watchers,
            "building interceptor from configuration"
        );

        Interceptor::builder()
            .with_registry(Arc::new(registry.build()))
            .with_shared_resolver(resolver)
            .with_policy(self.policy())
            .build()
    }
}

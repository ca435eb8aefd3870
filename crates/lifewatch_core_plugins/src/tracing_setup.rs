//! Tracing subscriber setup.
//!
//! Provides [`TracingConfig`], which describes how `tracing` output should
//! look, and [`init_tracing`], which installs a matching subscriber.
//!
//! Installing is idempotent in the sense that matters to test harnesses: if a
//! global subscriber is already set (by the host or by an earlier call), the
//! new one is silently dropped.
//!
//! # Example
//!
//! ```
//! use lifewatch_core_plugins::{TracingConfig, TracingFormat, init_tracing};
//! use tracing::Level;
//!
//! init_tracing(
//!     &TracingConfig::default()
//!         .with_level(Level::DEBUG)
//!         .with_format(TracingFormat::Compact)
//!         .with_env_filter("lifewatch_watch=trace"),
//! );
//!
//! tracing::info!("watchers ready");
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

// ─────────────────────────────────────────────────────────────────────────────
// TracingFormat
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingFormat {
    /// Human-readable colored output (default).
    #[default]
    Pretty,
    /// Compact single-line output.
    Compact,
    /// JSON structured output for log aggregation.
    Json,
}

/// Error returned when parsing an unknown [`TracingFormat`] name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tracing format '{0}', expected pretty, compact or json")]
pub struct ParseFormatError(String);

impl FromStr for TracingFormat {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(ParseFormatError(s.to_owned())),
        }
    }
}

impl fmt::Display for TracingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TracingConfig
// ─────────────────────────────────────────────────────────────────────────────

/// How the `tracing` subscriber should be configured.
///
/// # Fields
///
/// - `level` - The maximum log level, used when no filter is given
/// - `format` - The output format (Pretty, Compact, or Json)
/// - `env_filter` - Optional per-target directives, e.g. `lifewatch_watch=trace`
/// - `span_events` - Whether span enter/exit events are printed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Maximum log level.
    pub level: Level,
    /// Output format.
    pub format: TracingFormat,
    /// Environment filter directives.
    pub env_filter: Option<String>,
    /// Whether to include span events (enter/exit).
    pub span_events: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingFormat::Pretty,
            env_filter: None,
            span_events: false,
        }
    }
}

impl TracingConfig {
    /// Creates a config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum log level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets a custom environment filter string.
    ///
    /// Format: `target=level,target=level,...`
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Enables span enter/exit events in output.
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// Builds the filter, falling back to `level` if the directives do not parse.
    fn filter(&self) -> EnvFilter {
        match &self.env_filter {
            Some(filter) => {
                EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
            }
            None => EnvFilter::new(self.level.as_str()),
        }
    }

    fn fmt_span(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// init_tracing
// ─────────────────────────────────────────────────────────────────────────────

/// Installs a global subscriber described by `config`.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing(config: &TracingConfig) {
    let span_events = config.fmt_span();
    let layer = tracing_subscriber::fmt::layer::<Registry>();
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        TracingFormat::Pretty => layer.pretty().with_span_events(span_events).boxed(),
        TracingFormat::Compact => layer.compact().with_span_events(span_events).boxed(),
        TracingFormat::Json => layer.json().with_span_events(span_events).boxed(),
    };

    // try_init().ok() ignores errors if already initialized
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(config.filter())
        .try_init()
        .ok();

    tracing::debug!(
        level = %config.level,
        format = %config.format,
        "tracing initialized"
    );
}

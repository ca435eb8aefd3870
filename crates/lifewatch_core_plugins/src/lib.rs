//! Core infrastructure for lifewatch.
//!
//! This crate provides what most hosts need around the notification core:
//!
//! - [`init_tracing`] / [`TracingConfig`] - Logging via the `tracing` crate
//! - [`WatchConfig`] - TOML configuration with environment overrides
//! - [`LoggingWatcher`] - Built-in watcher logging every watched invocation
//! - [`ClockProvider`] - Mockable time source used for timing
//!
//! # Feature Flags
//!
//! - `test-utils` - Enables [`MockClock`] and [`RecordingWatcher`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lifewatch_core_plugins::WatchConfig;
//! use lifewatch_watch::RunnerDirectory;
//!
//! let mut config = WatchConfig::load("lifewatch.toml").unwrap_or_default();
//! config.merge_with_env().unwrap();
//! config.init_tracing().unwrap();
//!
//! let directory = Arc::new(RunnerDirectory::new());
//! let interceptor = config.interceptor(directory.clone());
//! ```

mod config;
mod logging_watcher;
mod time;
mod tracing_setup;

#[cfg(any(test, feature = "test-utils"))]
mod recording;

pub use config::{
    ConfigError, DispatchMode, ENV_DISPATCH, ENV_LOG_FORMAT, ENV_LOG_LEVEL, ENV_WATCHERS,
    LoggingConfig, WatchConfig,
};
pub use logging_watcher::LoggingWatcher;
pub use time::{ClockProvider, SystemClock};
pub use tracing_setup::{ParseFormatError, TracingConfig, TracingFormat, init_tracing};

// Re-export test utilities
#[cfg(any(test, feature = "test-utils"))]
pub use recording::{Notification, Phase, RecordingWatcher};
#[cfg(any(test, feature = "test-utils"))]
pub use time::MockClock;

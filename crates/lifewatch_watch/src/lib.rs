//! Reentrancy-safe watcher notification for intercepted lifecycle calls.
//!
//! `lifewatch_watch` sits between an interception shim and a set of pluggable
//! watchers. For every intercepted call of a particle method it notifies each
//! watcher exactly once before and once after the *outermost* invocation of
//! that method by that runner on that thread, however deeply the call
//! re-enters itself.
//!
//! # Core Concepts
//!
//! - [`Interceptor`] - The intercept entry point
//! - [`ReentrancyGauge`] - Per-thread nesting counters
//! - [`WatcherRegistry`] - Lazily discovered watcher set
//! - [`Dispatcher`] - Ordered fan-out to watchers
//! - [`MethodWatcher`] - The watcher SPI
//! - [`RunnerResolver`] - Maps invocations to their runner
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lifewatch_model::{CallFrame, LifecycleKind, MethodDescriptor, RunnerHandle, TargetHandle};
//! use lifewatch_watch::{Interceptor, RunnerDirectory, WatcherRegistry};
//!
//! let directory = Arc::new(RunnerDirectory::new());
//! let interceptor = Interceptor::builder()
//!     .with_registry(Arc::new(WatcherRegistry::empty()))
//!     .with_shared_resolver(directory.clone())
//!     .build();
//!
//! let target = TargetHandle::new("FooTest instance");
//! directory.bind_target(&target, RunnerHandle::new("FooTest runner"));
//!
//! let method = MethodDescriptor::new("FooTest", "test_foo").with_marker(LifecycleKind::Test);
//! let call = CallFrame::for_method(method).with_target(target);
//!
//! let outcome: Result<(), std::fmt::Error> = interceptor.intercept(&call, || Ok(()));
//! assert!(outcome.is_ok());
//! ```

/// Fan-out of notifications to watchers.
pub mod dispatch;

/// Per-thread reentrancy tracking.
pub mod gauge;

/// The intercept entry point.
pub mod intercept;

/// Watcher discovery and registry.
pub mod registry;

/// Runner resolution.
pub mod resolve;

/// The watcher SPI.
pub mod watcher;

pub use dispatch::{DispatchPolicy, Dispatcher};
pub use gauge::{DepthGauge, InvocationKey, ReentrancyGauge, ThreadKey};
pub use intercept::{ExecutionContext, Interceptor, InterceptorBuilder};
pub use registry::{
    InventorySource, RegistrationError, StaticSource, WatcherRegistration, WatcherRegistry,
    WatcherRegistryBuilder, WatcherSource,
};
pub use resolve::{NoRunners, RunnerDirectory, RunnerResolver, RunnerScope};
pub use watcher::{MethodWatcher, SharedWatcher, WatcherId};

/// Re-exported so watcher crates can submit registrations without a direct dependency.
pub use inventory;

//! Reentrancy-safe watcher notifications for intercepted test lifecycle methods.
//!
//! Re-exports the lifewatch crates for convenience:
//!
//! - [`lifewatch_model`] - Handles, method descriptors and the invocation classifier
//! - [`lifewatch_watch`] - Reentrancy gauge, watcher registry, dispatcher and interceptor
//! - [`lifewatch_core_plugins`] - Tracing setup, configuration and built-in watchers
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lifewatch::prelude::*;
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
//! assert!(interceptor.is_lifecycle_method(&method));
//!
//! let call = CallFrame::for_method(method).with_target(target);
//! let answer: Result<u32, std::io::Error> = interceptor.intercept(&call, || Ok(42));
//! assert_eq!(answer.unwrap(), 42);
//! ```

/// Data model and invocation classifier.
pub use lifewatch_model;

/// Notification core.
pub use lifewatch_watch;

/// Ambient infrastructure.
pub use lifewatch_core_plugins;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use lifewatch_core_plugins::{
        LoggingWatcher, TracingConfig, TracingFormat, WatchConfig, init_tracing,
    };
    pub use lifewatch_model::{
        Argument, CallFrame, CallOwner, InvocationFailure, LifecycleKind, Marker,
        MethodDescriptor, ReflectiveCall, RunnerHandle, TargetHandle,
    };
    pub use lifewatch_watch::{
        DispatchPolicy, ExecutionContext, Interceptor, MethodWatcher, RunnerDirectory,
        RunnerResolver, WatcherRegistry,
    };
}

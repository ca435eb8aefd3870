//! Invocation data model for lifewatch.
//!
//! `lifewatch_model` describes what an intercepted lifecycle call looks like
//! and decides whether a call is worth watching:
//!
//! - [`handle`] - Opaque runner, target and argument handles
//! - [`method`] - Method descriptors and the five lifecycle markers
//! - [`call`] - Intercepted calls and the invocation classifier
//! - [`failure`] - Failure descriptors reported to watchers
//!
//! # Example
//!
//! ```
//! use lifewatch_model::{classify, CallFrame, Classification, LifecycleKind, MethodDescriptor};
//!
//! let helper = MethodDescriptor::new("FooTest", "helper");
//! let test = MethodDescriptor::new("FooTest", "test_foo").with_marker(LifecycleKind::Test);
//!
//! assert!(matches!(
//!     classify(&CallFrame::for_method(helper)),
//!     Classification::NotParticle(_)
//! ));
//! assert!(classify(&CallFrame::for_method(test)).is_particle());
//! ```

/// Intercepted calls and the invocation classifier.
pub mod call;

/// Failure descriptors reported to watchers.
pub mod failure;

/// Opaque runner, target and argument handles.
pub mod handle;

/// Method descriptors and lifecycle markers.
pub mod method;

pub use call::{
    CallFrame, CallOwner, Classification, ExtractError, InvocationContext, ReflectiveCall,
    classify,
};
pub use failure::{InvocationFailure, panic_message};
pub use handle::{Argument, HandleId, RunnerHandle, TargetHandle};
pub use method::{LifecycleKind, Marker, MethodDescriptor, is_particle_method};

//! The watcher SPI.
//!
//! A [`MethodWatcher`] is notified before and after every outermost
//! invocation of a particle method. Watchers are side-effect only: they
//! cannot alter the invocation or its outcome.

use core::any::{Any, TypeId};
use std::sync::Arc;

use downcast_rs::{DowncastSync, impl_downcast};
use lifewatch_model::{Argument, InvocationFailure, MethodDescriptor, RunnerHandle, TargetHandle};

/// A shared, type-erased watcher.
pub type SharedWatcher = Arc<dyn MethodWatcher>;

// ─────────────────────────────────────────────────────────────────────────────
// MethodWatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Observer of particle method invocations.
///
/// Hooks run synchronously on the invoking thread, in discovery order. A
/// panicking hook unwinds through the interceptor unless the dispatcher runs
/// with [`DispatchPolicy::Isolate`](crate::dispatch::DispatchPolicy::Isolate).
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use lifewatch_model::{Argument, InvocationFailure, MethodDescriptor, RunnerHandle, TargetHandle};
/// use lifewatch_watch::MethodWatcher;
///
/// #[derive(Default)]
/// struct FailureCounter(AtomicUsize);
///
/// impl MethodWatcher for FailureCounter {
///     fn before_invocation(
///         &self,
///         _runner: &RunnerHandle,
///         _target: Option<&TargetHandle>,
///         _method: &MethodDescriptor,
///         _params: &[Argument],
///     ) {
///     }
///
///     fn after_invocation(
///         &self,
///         _runner: &RunnerHandle,
///         _target: Option<&TargetHandle>,
///         _method: &MethodDescriptor,
///         failure: Option<&InvocationFailure<'_>>,
///     ) {
///         if failure.is_some() {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait MethodWatcher: DowncastSync {
    /// Name used for logging, allow-lists and duplicate detection.
    ///
    /// Defaults to the implementing type's name.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }

    /// Called before the outermost invocation of `method` by `runner`.
    fn before_invocation(
        &self,
        runner: &RunnerHandle,
        target: Option<&TargetHandle>,
        method: &MethodDescriptor,
        params: &[Argument],
    );

    /// Called after the outermost invocation completes, successfully or not.
    ///
    /// `failure` is `None` on success.
    fn after_invocation(
        &self,
        runner: &RunnerHandle,
        target: Option<&TargetHandle>,
        method: &MethodDescriptor,
        failure: Option<&InvocationFailure<'_>>,
    );
}

impl_downcast!(sync MethodWatcher);

// ─────────────────────────────────────────────────────────────────────────────
// WatcherId
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a watcher type.
///
/// Based on [`TypeId`], so each watcher type has exactly one `WatcherId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId {
    type_id: TypeId,
    type_name: &'static str,
}

impl WatcherId {
    /// Creates a `WatcherId` for the given watcher type.
    #[must_use]
    pub fn of<W: MethodWatcher>() -> Self {
        Self {
            type_id: TypeId::of::<W>(),
            type_name: core::any::type_name::<W>(),
        }
    }

    /// Returns the underlying `TypeId`.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the type name for debugging.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns `true` if `watcher`'s runtime type is the type this id names.
    #[must_use]
    pub fn matches(&self, watcher: &dyn MethodWatcher) -> bool {
        Any::type_id(watcher.as_any()) == self.type_id
    }
}

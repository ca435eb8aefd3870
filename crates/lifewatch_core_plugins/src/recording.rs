//! A watcher that records notifications for assertions in tests.

use lifewatch_model::{
    Argument, HandleId, InvocationFailure, LifecycleKind, MethodDescriptor, RunnerHandle,
    TargetHandle,
};
use lifewatch_watch::MethodWatcher;
use parking_lot::Mutex;

/// Which hook a [`Notification`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `before_invocation`.
    Before,
    /// `after_invocation`.
    After,
}

/// One notification received by a [`RecordingWatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The hook that was called.
    pub phase: Phase,
    /// Identity of the runner.
    pub runner: HandleId,
    /// Identity of the target, if any.
    pub target: Option<HandleId>,
    /// The invoked method.
    pub method: MethodDescriptor,
    /// Lifecycle kind of the method.
    pub kind: Option<LifecycleKind>,
    /// Number of arguments (before hooks only).
    pub params: usize,
    /// Rendered failure (after hooks only).
    pub failure: Option<String>,
}

/// Records every notification it receives, in order.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use lifewatch_core_plugins::RecordingWatcher;
/// use lifewatch_watch::WatcherRegistry;
///
/// let recorder = Arc::new(RecordingWatcher::new());
/// let mut builder = WatcherRegistry::builder();
/// builder.register_shared(recorder.clone()).unwrap();
///
/// assert!(recorder.notifications().is_empty());
/// ```
#[derive(Debug)]
pub struct RecordingWatcher {
    name: String,
    notifications: Mutex<Vec<Notification>>,
}

impl Default for RecordingWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingWatcher {
    /// Creates a recorder named `"recording"`.
    #[must_use]
    pub fn new() -> Self {
        Self::named("recording")
    }

    /// Creates a recorder with a custom name, so several can coexist.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            notifications: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of everything recorded so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    /// Returns how many notifications of `phase` were recorded.
    #[must_use]
    pub fn count(&self, phase: Phase) -> usize {
        self.notifications
            .lock()
            .iter()
            .filter(|n| n.phase == phase)
            .count()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.notifications.lock().clear();
    }
}

impl MethodWatcher for RecordingWatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_invocation(
        &self,
        runner: &RunnerHandle,
        target: Option<&TargetHandle>,
        method: &MethodDescriptor,
        params: &[Argument],
    ) {
        self.notifications.lock().push(Notification {
            phase: Phase::Before,
            runner: runner.id(),
            target: target.map(TargetHandle::id),
            method: method.clone(),
            kind: method.lifecycle_kind(),
            params: params.len(),
            failure: None,
        });
    }

    fn after_invocation(
        &self,
        runner: &RunnerHandle,
        target: Option<&TargetHandle>,
        method: &MethodDescriptor,
        failure: Option<&InvocationFailure<'_>>,
    ) {
        self.notifications.lock().push(Notification {
            phase: Phase::After,
            runner: runner.id(),
            target: target.map(TargetHandle::id),
            method: method.clone(),
            kind: method.lifecycle_kind(),
            params: 0,
            failure: failure.map(ToString::to_string),
        });
    }
}

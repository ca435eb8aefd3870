//! The built-in logging watcher.
//!
//! [`LoggingWatcher`] reports every outermost lifecycle invocation through
//! `tracing`: an `info` event when it starts and an `info` (success) or
//! `warn` (failure) event with the elapsed time when it finishes.
//!
//! It is registered for link-time discovery under the name `"logging"`, so
//! any interceptor backed by [`InventorySource`](lifewatch_watch::InventorySource)
//! picks it up unless an allow-list excludes it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use lifewatch_model::{
    Argument, HandleId, InvocationFailure, MethodDescriptor, RunnerHandle, TargetHandle,
};
use lifewatch_watch::{
    ExecutionContext, MethodWatcher, SharedWatcher, ThreadKey, WatcherRegistration,
};
use parking_lot::Mutex;

use crate::time::{ClockProvider, SystemClock};

/// Start times are kept per thread, runner and method.
///
/// The thread is the one the invocation is attributed to, so synthetic
/// contexts sharing an OS thread are timed separately.
type TimingKey = (ThreadKey, HandleId, MethodDescriptor);

/// Logs the start and finish of each watched invocation.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use lifewatch_core_plugins::LoggingWatcher;
/// use lifewatch_watch::WatcherRegistry;
///
/// let mut builder = WatcherRegistry::builder();
/// builder.register(LoggingWatcher::new()).unwrap();
/// let registry = builder.build();
/// assert_eq!(registry.names(), vec!["logging".to_owned()]);
/// ```
pub struct LoggingWatcher {
    clock: Arc<dyn ClockProvider>,
    started: Mutex<HashMap<TimingKey, Vec<Instant>>>,
}

impl Default for LoggingWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for LoggingWatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoggingWatcher")
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl LoggingWatcher {
    /// Name under which the watcher registers itself.
    pub const NAME: &'static str = "logging";

    /// Creates a watcher timed by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a watcher timed by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn ClockProvider>) -> Self {
        Self {
            clock,
            started: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of invocations started but not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.started.lock().values().map(Vec::len).sum()
    }

    /// Returns the number of unfinished invocations attributed to `thread`.
    #[must_use]
    pub fn in_flight_on(&self, thread: ThreadKey) -> usize {
        self.started
            .lock()
            .iter()
            .filter(|((key_thread, _, _), _)| *key_thread == thread)
            .map(|(_, stack)| stack.len())
            .sum()
    }

    fn start(&self, key: TimingKey) {
        let now = self.clock.now();
        self.started.lock().entry(key).or_default().push(now);
    }

    fn finish(&self, key: &TimingKey) -> Option<Duration> {
        let mut started = self.started.lock();
        let stack = started.get_mut(key)?;
        let start = stack.pop();
        if stack.is_empty() {
            started.remove(key);
        }
        start.map(|start| self.clock.now().saturating_duration_since(start))
    }
}

impl MethodWatcher for LoggingWatcher {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn before_invocation(
        &self,
        runner: &RunnerHandle,
        target: Option<&TargetHandle>,
        method: &MethodDescriptor,
        params: &[Argument],
    ) {
        self.start((notified_thread(), runner.id(), method.clone()));
        tracing::info!(
            runner = %runner,
            instance = target.map(TargetHandle::label),
            %method,
            kind = method.lifecycle_kind().map(tracing::field::display),
            params = params.len(),
            "lifecycle method started"
        );
    }

    fn after_invocation(
        &self,
        runner: &RunnerHandle,
        _target: Option<&TargetHandle>,
        method: &MethodDescriptor,
        failure: Option<&InvocationFailure<'_>>,
    ) {
        let elapsed = self.finish(&(notified_thread(), runner.id(), method.clone()));
        let elapsed_ms = elapsed.map(|elapsed| elapsed.as_secs_f64() * 1000.0);

        match failure {
            None => tracing::info!(runner = %runner, %method, elapsed_ms, "lifecycle method finished"),
            Some(failure) => tracing::warn!(
                runner = %runner,
                %method,
                elapsed_ms,
                %failure,
                panicked = failure.is_panic(),
                "lifecycle method failed"
            ),
        }
    }
}

fn notified_thread() -> ThreadKey {
    ExecutionContext::notifying().thread()
}

fn create() -> SharedWatcher {
    Arc::new(LoggingWatcher::new())
}

lifewatch_watch::inventory::submit! {
    WatcherRegistration::new(LoggingWatcher::NAME, create)
}

//! Fan-out of invocation notifications to watchers.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use lifewatch_model::{
    Argument, InvocationFailure, MethodDescriptor, RunnerHandle, TargetHandle, panic_message,
};

use crate::registry::WatcherRegistry;
use crate::watcher::MethodWatcher;

/// What happens when a watcher hook panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// The panic unwinds out of the dispatch and through the interceptor.
    /// Watchers after the panicking one are not notified.
    #[default]
    Propagate,
    /// The panic is caught and logged; remaining watchers are still notified.
    Isolate,
}

/// Notifies every registered watcher, in discovery order.
///
/// The dispatcher holds no state of its own beyond the registry handle; it
/// does not know about nesting. Callers decide *when* to notify.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<WatcherRegistry>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<WatcherRegistry>, policy: DispatchPolicy) -> Self {
        Self { registry, policy }
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<WatcherRegistry> {
        &self.registry
    }

    /// Returns the panic policy.
    #[must_use]
    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Calls [`MethodWatcher::before_invocation`] on every watcher.
    pub fn notify_before(
        &self,
        runner: &RunnerHandle,
        target: Option<&TargetHandle>,
        method: &MethodDescriptor,
        params: &[Argument],
    ) {
        self.each("before", method, |watcher| {
            watcher.before_invocation(runner, target, method, params);
        });
    }

    /// Calls [`MethodWatcher::after_invocation`] on every watcher.
    pub fn notify_after(
        &self,
        runner: &RunnerHandle,
        target: Option<&TargetHandle>,
        method: &MethodDescriptor,
        failure: Option<&InvocationFailure<'_>>,
    ) {
        self.each("after", method, |watcher| {
            watcher.after_invocation(runner, target, method, failure);
        });
    }

    fn each(
        &self,
        phase: &'static str,
        method: &MethodDescriptor,
        mut notify: impl FnMut(&dyn MethodWatcher),
    ) {
        let watchers = self.registry.watchers();

        for watcher in watchers.iter() {
            let watcher: &dyn MethodWatcher = watcher.as_ref();
            tracing::trace!(watcher = watcher.name(), phase, %method, "notifying watcher");

            match self.policy {
                DispatchPolicy::Propagate => notify(watcher),
                DispatchPolicy::Isolate => {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| notify(watcher))) {
                        tracing::error!(
                            watcher = watcher.name(),
                            phase,
                            %method,
                            panic = panic_message(&*payload),
                            "watcher panicked, continuing with remaining watchers"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifewatch_model::LifecycleKind;
    use parking_lot::Mutex;

    struct Journal {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        panics: bool,
    }

    impl MethodWatcher for Journal {
        fn name(&self) -> &str {
            self.name
        }

        fn before_invocation(
            &self,
            _runner: &RunnerHandle,
            _target: Option<&TargetHandle>,
            method: &MethodDescriptor,
            params: &[Argument],
        ) {
            self.log
                .lock()
                .push(format!("{}:before:{}:{}", self.name, method.name(), params.len()));
            assert!(!self.panics, "{} refuses", self.name);
        }

        fn after_invocation(
            &self,
            _runner: &RunnerHandle,
            _target: Option<&TargetHandle>,
            method: &MethodDescriptor,
            failure: Option<&InvocationFailure<'_>>,
        ) {
            let outcome = failure.map_or_else(|| "ok".to_owned(), ToString::to_string);
            self.log
                .lock()
                .push(format!("{}:after:{}:{}", self.name, method.name(), outcome));
            assert!(!self.panics, "{} refuses", self.name);
        }
    }

    fn dispatcher(
        policy: DispatchPolicy,
        watchers: &[(&'static str, bool)],
    ) -> (Dispatcher, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = WatcherRegistry::builder();
        for &(name, panics) in watchers {
            builder
                .register(Journal {
                    name,
                    log: Arc::clone(&log),
                    panics,
                })
                .expect("unique names");
        }
        (Dispatcher::new(Arc::new(builder.build()), policy), log)
    }

    fn test_method() -> MethodDescriptor {
        MethodDescriptor::new("FooTest", "test_foo").with_marker(LifecycleKind::Test)
    }

    #[test]
    fn notifies_in_registration_order() {
        let (dispatcher, log) = dispatcher(
            DispatchPolicy::Propagate,
            &[("first", false), ("second", false), ("third", false)],
        );
        let runner = RunnerHandle::new(());

        dispatcher.notify_before(&runner, None, &test_method(), &[Argument::new(1_u8)]);
        dispatcher.notify_after(&runner, None, &test_method(), None);

        assert_eq!(
            *log.lock(),
            vec![
                "first:before:test_foo:1",
                "second:before:test_foo:1",
                "third:before:test_foo:1",
                "first:after:test_foo:ok",
                "second:after:test_foo:ok",
                "third:after:test_foo:ok",
            ]
        );
    }

    #[test]
    fn after_receives_failure() {
        let (dispatcher, log) = dispatcher(DispatchPolicy::Propagate, &[("only", false)]);
        let runner = RunnerHandle::new(());

        dispatcher.notify_after(
            &runner,
            None,
            &test_method(),
            Some(&InvocationFailure::Panic("boom")),
        );

        assert_eq!(*log.lock(), vec!["only:after:test_foo:panicked: boom"]);
    }

    #[test]
    fn propagate_stops_at_panicking_watcher() {
        let (dispatcher, log) = dispatcher(
            DispatchPolicy::Propagate,
            &[("first", false), ("broken", true), ("last", false)],
        );
        let runner = RunnerHandle::new(());

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            dispatcher.notify_before(&runner, None, &test_method(), &[]);
        }));

        assert!(result.is_err());
        assert_eq!(
            *log.lock(),
            vec!["first:before:test_foo:0", "broken:before:test_foo:0"]
        );
    }

    #[test]
    fn isolate_continues_past_panicking_watcher() {
        let (dispatcher, log) = dispatcher(
            DispatchPolicy::Isolate,
            &[("first", false), ("broken", true), ("last", false)],
        );
        let runner = RunnerHandle::new(());

        dispatcher.notify_before(&runner, None, &test_method(), &[]);

        assert_eq!(
            *log.lock(),
            vec![
                "first:before:test_foo:0",
                "broken:before:test_foo:0",
                "last:before:test_foo:0",
            ]
        );
    }

    #[test]
    fn empty_registry_is_a_noop() {
        let dispatcher = Dispatcher::new(Arc::new(WatcherRegistry::empty()), DispatchPolicy::default());
        dispatcher.notify_before(&RunnerHandle::new(()), None, &test_method(), &[]);
        dispatcher.notify_after(&RunnerHandle::new(()), None, &test_method(), None);
    }
}

//! Runner resolution.
//!
//! Watchers are told which runner owns an invocation. Instance methods are
//! resolved through their target; class-level hooks have no target and are
//! resolved through the thread that runs them.

use hashbrown::HashMap;
use lifewatch_model::{RunnerHandle, TargetHandle};
use parking_lot::{Mutex, RwLock};

use crate::gauge::ThreadKey;

/// Looks up the runner that owns an invocation.
pub trait RunnerResolver: Send + Sync + 'static {
    /// Returns the runner that created `target`, if known.
    fn runner_for_target(&self, target: &TargetHandle) -> Option<RunnerHandle>;

    /// Returns the runner currently executing on `thread`, if any.
    fn runner_for_thread(&self, thread: ThreadKey) -> Option<RunnerHandle>;
}

/// A resolver that never finds a runner. Every invocation bypasses watchers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRunners;

impl RunnerResolver for NoRunners {
    fn runner_for_target(&self, _target: &TargetHandle) -> Option<RunnerHandle> {
        None
    }

    fn runner_for_thread(&self, _thread: ThreadKey) -> Option<RunnerHandle> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RunnerDirectory
// ─────────────────────────────────────────────────────────────────────────────

/// Bookkeeping resolver fed by the test engine.
///
/// - The engine binds each test instance it creates to its runner with
///   [`bind_target`](Self::bind_target).
/// - A thread announces the runner it is executing with
///   [`enter_runner`](Self::enter_runner); the returned [`RunnerScope`]
///   withdraws the announcement when dropped. Scopes nest, so a suite runner
///   executing a child runner on the same thread resolves to the child until
///   the child's scope ends.
///
/// # Example
///
/// ```
/// use lifewatch_model::{RunnerHandle, TargetHandle};
/// use lifewatch_watch::gauge::ThreadKey;
/// use lifewatch_watch::resolve::{RunnerDirectory, RunnerResolver};
///
/// let directory = RunnerDirectory::new();
/// let runner = RunnerHandle::new("FooTest runner");
///
/// {
///     let _scope = directory.enter_runner(runner.clone());
///     assert_eq!(directory.runner_for_thread(ThreadKey::current()), Some(runner));
/// }
/// assert_eq!(directory.runner_for_thread(ThreadKey::current()), None);
/// ```
#[derive(Debug, Default)]
pub struct RunnerDirectory {
    targets: RwLock<HashMap<TargetHandle, RunnerHandle>>,
    threads: Mutex<HashMap<ThreadKey, Vec<RunnerHandle>>>,
}

impl RunnerDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `runner` created `target`, returning the previous binding.
    pub fn bind_target(&self, target: &TargetHandle, runner: RunnerHandle) -> Option<RunnerHandle> {
        self.targets.write().insert(target.clone(), runner)
    }

    /// Forgets the binding for `target`, returning it.
    pub fn unbind_target(&self, target: &TargetHandle) -> Option<RunnerHandle> {
        self.targets.write().remove(target)
    }

    /// Announces that the calling thread is executing `runner`.
    #[must_use = "the runner is withdrawn when the scope is dropped"]
    pub fn enter_runner(&self, runner: RunnerHandle) -> RunnerScope<'_> {
        self.enter_runner_on(ThreadKey::current(), runner)
    }

    /// Announces that `thread` is executing `runner`.
    #[must_use = "the runner is withdrawn when the scope is dropped"]
    pub fn enter_runner_on(&self, thread: ThreadKey, runner: RunnerHandle) -> RunnerScope<'_> {
        self.threads.lock().entry(thread).or_default().push(runner);
        RunnerScope {
            directory: self,
            thread,
        }
    }

    fn leave_runner(&self, thread: ThreadKey) {
        let mut threads = self.threads.lock();
        if let Some(stack) = threads.get_mut(&thread) {
            stack.pop();
            if stack.is_empty() {
                threads.remove(&thread);
            }
        }
    }
}

impl RunnerResolver for RunnerDirectory {
    fn runner_for_target(&self, target: &TargetHandle) -> Option<RunnerHandle> {
        self.targets.read().get(target).cloned()
    }

    fn runner_for_thread(&self, thread: ThreadKey) -> Option<RunnerHandle> {
        self.threads
            .lock()
            .get(&thread)
            .and_then(|stack| stack.last().cloned())
    }
}

/// Guard returned by [`RunnerDirectory::enter_runner`].
#[derive(Debug)]
pub struct RunnerScope<'a> {
    directory: &'a RunnerDirectory,
    thread: ThreadKey,
}

impl Drop for RunnerScope<'_> {
    fn drop(&mut self) {
        self.directory.leave_runner(self.thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_binding_round_trip() {
        let directory = RunnerDirectory::new();
        let target = TargetHandle::new("instance");
        let runner = RunnerHandle::new("runner");

        assert_eq!(directory.runner_for_target(&target), None);
        assert_eq!(directory.bind_target(&target, runner.clone()), None);
        assert_eq!(directory.runner_for_target(&target), Some(runner.clone()));
        assert_eq!(directory.unbind_target(&target), Some(runner));
        assert_eq!(directory.runner_for_target(&target), None);
    }

    #[test]
    fn targets_resolve_by_identity() {
        let directory = RunnerDirectory::new();
        let bound = TargetHandle::new(1_u32);
        let lookalike = TargetHandle::new(1_u32);
        directory.bind_target(&bound, RunnerHandle::new(()));

        assert!(directory.runner_for_target(&lookalike).is_none());
    }

    #[test]
    fn runner_scopes_nest() {
        let directory = RunnerDirectory::new();
        let thread = ThreadKey::synthetic(7);
        let suite = RunnerHandle::new("suite");
        let child = RunnerHandle::new("child");

        let outer = directory.enter_runner_on(thread, suite.clone());
        {
            let _inner = directory.enter_runner_on(thread, child.clone());
            assert_eq!(directory.runner_for_thread(thread), Some(child));
        }
        assert_eq!(directory.runner_for_thread(thread), Some(suite));
        drop(outer);
        assert_eq!(directory.runner_for_thread(thread), None);
    }

    #[test]
    fn threads_are_independent() {
        let directory = RunnerDirectory::new();
        let runner = RunnerHandle::new(());
        let _scope = directory.enter_runner_on(ThreadKey::synthetic(1), runner.clone());

        assert_eq!(directory.runner_for_thread(ThreadKey::synthetic(1)), Some(runner));
        assert_eq!(directory.runner_for_thread(ThreadKey::synthetic(2)), None);
    }

    #[test]
    fn no_runners_resolves_nothing() {
        assert!(NoRunners.runner_for_target(&TargetHandle::new(())).is_none());
        assert!(NoRunners.runner_for_thread(ThreadKey::current()).is_none());
    }
}

//! Per-thread reentrancy tracking.
//!
//! A lifecycle method may reflectively re-enter itself (a configuration
//! method invoking another instrumented call on the same runner). Watchers
//! must only see the outermost occurrence, so every `(thread, runner, method)`
//! key carries a [`DepthGauge`] that counts how deeply the key is nested.
//!
//! Gauges live in thread-local storage: a thread only ever touches its own
//! counters, and they are reclaimed when the thread exits. The thread part of
//! the key is explicit ([`ThreadKey`]) so that a single test thread can
//! simulate several independent threads.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use hashbrown::HashMap;
use lifewatch_model::{HandleId, MethodDescriptor, RunnerHandle};

// ─────────────────────────────────────────────────────────────────────────────
// ThreadKey
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of the thread an invocation runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadKey {
    /// A real operating system thread.
    Os(ThreadId),
    /// A caller-chosen identity standing in for a thread.
    Synthetic(u64),
}

impl ThreadKey {
    /// Returns the key of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        Self::Os(thread::current().id())
    }

    /// Returns a synthetic key.
    #[must_use]
    pub const fn synthetic(id: u64) -> Self {
        Self::Synthetic(id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// InvocationKey
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of one nesting sequence: `(thread, runner, method)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationKey {
    thread: ThreadKey,
    runner: HandleId,
    method: MethodDescriptor,
}

impl InvocationKey {
    /// Creates the key for `method` run by `runner` on `thread`.
    #[must_use]
    pub fn new(thread: ThreadKey, runner: &RunnerHandle, method: &MethodDescriptor) -> Self {
        Self {
            thread,
            runner: runner.id(),
            method: method.clone(),
        }
    }

    /// Returns the thread part of the key.
    #[must_use]
    pub fn thread(&self) -> ThreadKey {
        self.thread
    }

    /// Returns the runner identity part of the key.
    #[must_use]
    pub fn runner(&self) -> HandleId {
        self.runner
    }

    /// Returns the method part of the key.
    #[must_use]
    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DepthGauge
// ─────────────────────────────────────────────────────────────────────────────

/// Nesting counter for a single key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepthGauge {
    depth: i64,
}

impl DepthGauge {
    /// Creates a gauge at depth zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { depth: 0 }
    }

    /// Increments the depth, returning the depth *before* incrementing.
    pub fn increase(&mut self) -> i64 {
        let before = self.depth;
        self.depth += 1;
        before
    }

    /// Decrements the depth, returning the depth *after* decrementing.
    pub fn decrease(&mut self) -> i64 {
        self.depth -= 1;
        self.depth
    }

    /// Returns the current depth.
    #[must_use]
    pub const fn depth(&self) -> i64 {
        self.depth
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReentrancyGauge
// ─────────────────────────────────────────────────────────────────────────────

static NEXT_GAUGE_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static DEPTHS: RefCell<HashMap<(u64, InvocationKey), DepthGauge>> =
        RefCell::new(HashMap::new());
}

/// Answers "is this the outermost entry / exit?" for invocation keys.
///
/// Each `ReentrancyGauge` owns a private namespace within the thread-local
/// store, so two gauges never observe each other's counters. A counter exists
/// only while its key is entered; it is removed when the outermost entry
/// exits. Dropping the gauge clears whatever the calling thread still holds,
/// other threads reclaim theirs on exit.
///
/// # Example
///
/// ```
/// use lifewatch_model::{MethodDescriptor, RunnerHandle};
/// use lifewatch_watch::gauge::{InvocationKey, ReentrancyGauge, ThreadKey};
///
/// let gauge = ReentrancyGauge::new();
/// let key = InvocationKey::new(
///     ThreadKey::current(),
///     &RunnerHandle::new(()),
///     &MethodDescriptor::new("FooTest", "test_foo"),
/// );
///
/// assert!(gauge.enter(&key)); // outermost
/// assert!(!gauge.enter(&key)); // nested
/// assert!(!gauge.exit(&key));
/// assert!(gauge.exit(&key)); // closes the outermost entry
/// ```
#[derive(Debug)]
pub struct ReentrancyGauge {
    id: u64,
}

impl Default for ReentrancyGauge {
    fn default() -> Self {
        Self::new()
    }
}

impl ReentrancyGauge {
    /// Creates a gauge with its own counter namespace.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_GAUGE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Records an entry for `key`.
    ///
    /// Returns `true` iff the depth before this entry was zero.
    pub fn enter(&self, key: &InvocationKey) -> bool {
        let before = self.with_gauge(key, DepthGauge::increase);
        tracing::trace!(method = %key.method(), depth = before + 1, "gauge enter");
        before == 0
    }

    /// Records an exit for `key`.
    ///
    /// Returns `true` iff the depth after this exit is zero. An exit without a
    /// matching entry drives the depth negative; negative depths are never
    /// treated as outermost.
    pub fn exit(&self, key: &InvocationKey) -> bool {
        let after = DEPTHS.with_borrow_mut(|depths| {
            let slot = (self.id, key.clone());
            let after = depths.entry(slot.clone()).or_default().decrease();
            if after == 0 {
                depths.remove(&slot);
            }
            after
        });
        tracing::trace!(method = %key.method(), depth = after, "gauge exit");
        if after < 0 {
            tracing::warn!(
                method = %key.method(),
                depth = after,
                "gauge exit without matching entry"
            );
        }
        after == 0
    }

    /// Returns the current depth of `key` on the calling thread.
    #[must_use]
    pub fn depth(&self, key: &InvocationKey) -> i64 {
        DEPTHS.with_borrow(|depths| {
            depths
                .get(&(self.id, key.clone()))
                .map_or(0, DepthGauge::depth)
        })
    }

    fn with_gauge<R>(&self, key: &InvocationKey, f: impl FnOnce(&mut DepthGauge) -> R) -> R {
        DEPTHS.with_borrow_mut(|depths| f(depths.entry((self.id, key.clone())).or_default()))
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        DEPTHS.with_borrow(|depths| depths.keys().filter(|(owner, _)| *owner == self.id).count())
    }
}

impl Drop for ReentrancyGauge {
    fn drop(&mut self) {
        let id = self.id;
        // The store may already be gone if the gauge is dropped during thread teardown.
        let _ = DEPTHS.try_with(|depths| {
            if let Ok(mut depths) = depths.try_borrow_mut() {
                depths.retain(|(owner, _), _| *owner != id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key_on(thread: ThreadKey, runner: &RunnerHandle, method: &str) -> InvocationKey {
        InvocationKey::new(thread, runner, &MethodDescriptor::new("FooTest", method))
    }

    #[test]
    fn depth_gauge_reports_before_and_after() {
        let mut gauge = DepthGauge::new();

        assert_eq!(gauge.increase(), 0);
        assert_eq!(gauge.increase(), 1);
        assert_eq!(gauge.decrease(), 1);
        assert_eq!(gauge.decrease(), 0);
        assert_eq!(gauge.depth(), 0);
    }

    #[test]
    fn nested_entries_are_not_outermost() {
        let gauge = ReentrancyGauge::new();
        let key = key_on(ThreadKey::current(), &RunnerHandle::new(()), "test_foo");

        assert!(gauge.enter(&key));
        assert!(!gauge.enter(&key));
        assert!(!gauge.enter(&key));
        assert_eq!(gauge.depth(&key), 3);

        assert!(!gauge.exit(&key));
        assert!(!gauge.exit(&key));
        assert!(gauge.exit(&key));
        assert_eq!(gauge.depth(&key), 0);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let gauge = ReentrancyGauge::new();
        let runner = RunnerHandle::new(());
        let other_runner = RunnerHandle::new(());
        let thread = ThreadKey::current();

        let foo = key_on(thread, &runner, "test_foo");
        let bar = key_on(thread, &runner, "test_bar");
        let foo_elsewhere = key_on(thread, &other_runner, "test_foo");

        assert!(gauge.enter(&foo));
        assert!(gauge.enter(&bar));
        assert!(gauge.enter(&foo_elsewhere));
        assert_eq!(gauge.depth(&foo), 1);
    }

    #[test]
    fn synthetic_threads_do_not_share_depth() {
        let gauge = ReentrancyGauge::new();
        let runner = RunnerHandle::new(());
        let first = key_on(ThreadKey::synthetic(1), &runner, "test_foo");
        let second = key_on(ThreadKey::synthetic(2), &runner, "test_foo");

        assert!(gauge.enter(&first));
        assert!(gauge.enter(&second));
        assert!(gauge.exit(&first));
        assert!(gauge.exit(&second));
    }

    #[test]
    fn gauges_do_not_share_counters() {
        let first = ReentrancyGauge::new();
        let second = ReentrancyGauge::new();
        let key = key_on(ThreadKey::current(), &RunnerHandle::new(()), "test_foo");

        assert!(first.enter(&key));
        assert!(second.enter(&key));
    }

    #[test]
    fn unmatched_exit_goes_negative_and_is_never_outermost() {
        let gauge = ReentrancyGauge::new();
        let key = key_on(ThreadKey::current(), &RunnerHandle::new(()), "test_foo");

        assert!(!gauge.exit(&key));
        assert_eq!(gauge.depth(&key), -1);

        // Recovering from -1 lands on 0 but the entry itself was not from 0.
        assert!(!gauge.enter(&key));
        assert_eq!(gauge.depth(&key), 0);
        assert!(gauge.enter(&key));
    }

    #[test]
    fn dropping_a_gauge_clears_this_threads_counters() {
        let key = key_on(ThreadKey::current(), &RunnerHandle::new(()), "test_foo");
        let gauge = ReentrancyGauge::new();
        let id = gauge.id;
        assert!(gauge.enter(&key));
        drop(gauge);

        let remaining = DEPTHS.with_borrow(|depths| {
            depths.keys().filter(|(owner, _)| *owner == id).count()
        });
        assert_eq!(remaining, 0);
    }

    #[test]
    fn counters_are_removed_when_the_outermost_entry_exits() {
        let gauge = ReentrancyGauge::new();
        let key = key_on(ThreadKey::current(), &RunnerHandle::new(()), "test_foo");

        gauge.enter(&key);
        gauge.enter(&key);
        assert_eq!(gauge.tracked_keys(), 1);

        gauge.exit(&key);
        assert_eq!(gauge.tracked_keys(), 1);
        gauge.exit(&key);
        assert_eq!(gauge.tracked_keys(), 0);
    }

    #[test]
    fn other_threads_start_from_zero() {
        let gauge = std::sync::Arc::new(ReentrancyGauge::new());
        let runner = RunnerHandle::new(());
        let method = MethodDescriptor::new("FooTest", "test_foo");

        let here = InvocationKey::new(ThreadKey::current(), &runner, &method);
        assert!(gauge.enter(&here));

        let worker_gauge = std::sync::Arc::clone(&gauge);
        let outermost_elsewhere = thread::spawn(move || {
            let there = InvocationKey::new(ThreadKey::current(), &runner, &method);
            worker_gauge.enter(&there)
        })
        .join()
        .expect("worker panicked");

        assert!(outermost_elsewhere);
    }

    proptest! {
        #[test]
        fn balanced_nesting_fires_exactly_one_pair(depth in 1_usize..32) {
            let gauge = ReentrancyGauge::new();
            let key = key_on(ThreadKey::current(), &RunnerHandle::new(()), "test_foo");

            let outermost_entries = (0..depth).filter(|_| gauge.enter(&key)).count();
            let outermost_exits = (0..depth).filter(|_| gauge.exit(&key)).count();

            prop_assert_eq!(outermost_entries, 1);
            prop_assert_eq!(outermost_exits, 1);
            prop_assert_eq!(gauge.depth(&key), 0);
        }
    }
}

//! The intercept entry point.
//!
//! Every intercepted call moves through four states:
//!
//! 1. **Start** - the call is classified. Anything that is not a particle
//!    method call proceeds untouched.
//! 2. **Classified** - the owning runner is resolved. Without a runner the
//!    call proceeds untouched.
//! 3. **Invoked** - the gauge records the entry, watchers hear `before` if
//!    this is the outermost entry, then the call proceeds. Its outcome,
//!    including a panic, is held rather than propagated. A panic raised by a
//!    `before` hook is held in place of the outcome and the call is skipped.
//! 4. **Done** - the gauge records the exit, watchers hear `after` if this
//!    closes the outermost entry, and the held outcome is handed back.
//!
//! Callers observe exactly the outcome `proceed` produced: the same `Ok`
//! value, the same `Err`, or the same panic payload.

use core::cell::Cell;
use core::error::Error;
use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use lifewatch_model::{
    InvocationContext, InvocationFailure, MethodDescriptor, ReflectiveCall, RunnerHandle,
    classify, is_particle_method, panic_message,
};

use crate::dispatch::{DispatchPolicy, Dispatcher};
use crate::gauge::{InvocationKey, ReentrancyGauge, ThreadKey};
use crate::registry::WatcherRegistry;
use crate::resolve::{RunnerDirectory, RunnerResolver};
use crate::watcher::MethodWatcher;

// ─────────────────────────────────────────────────────────────────────────────
// ExecutionContext
// ─────────────────────────────────────────────────────────────────────────────

/// The thread identity an intercepted call is attributed to.
///
/// [`Interceptor::intercept`] uses the calling thread. Passing an explicit
/// context to [`Interceptor::intercept_in`] lets a single thread stand in for
/// several.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    thread: ThreadKey,
}

impl ExecutionContext {
    /// Returns the context of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        Self::for_thread(ThreadKey::current())
    }

    /// Returns a context with a synthetic thread identity.
    #[must_use]
    pub const fn synthetic(id: u64) -> Self {
        Self::for_thread(ThreadKey::synthetic(id))
    }

    /// Returns a context for the given thread identity.
    #[must_use]
    pub const fn for_thread(thread: ThreadKey) -> Self {
        Self { thread }
    }

    /// Returns the context whose watchers are being notified on this thread.
    ///
    /// Inside a watcher hook this is the context the invocation was attributed
    /// to, which differs from [`current`](Self::current) for synthetic
    /// contexts. Outside a hook it is the calling thread.
    #[must_use]
    pub fn notifying() -> Self {
        NOTIFYING
            .get()
            .map_or_else(Self::current, Self::for_thread)
    }

    /// Returns the thread identity.
    #[must_use]
    pub const fn thread(&self) -> ThreadKey {
        self.thread
    }
}

thread_local! {
    static NOTIFYING: Cell<Option<ThreadKey>> = const { Cell::new(None) };
}

/// Publishes the notified thread identity for the duration of a dispatch.
struct NotifyingScope {
    previous: Option<ThreadKey>,
}

impl NotifyingScope {
    fn enter(thread: ThreadKey) -> Self {
        Self {
            previous: NOTIFYING.replace(Some(thread)),
        }
    }
}

impl Drop for NotifyingScope {
    fn drop(&mut self) {
        NOTIFYING.set(self.previous);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// InterceptorBuilder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for an [`Interceptor`].
#[derive(Default)]
pub struct InterceptorBuilder {
    registry: Option<Arc<WatcherRegistry>>,
    resolver: Option<Arc<dyn RunnerResolver>>,
    policy: DispatchPolicy,
}

impl InterceptorBuilder {
    /// Sets the watcher registry. Defaults to [`WatcherRegistry::global`].
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<WatcherRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the runner resolver. Defaults to an empty [`RunnerDirectory`].
    #[must_use]
    pub fn with_resolver(self, resolver: impl RunnerResolver) -> Self {
        self.with_shared_resolver(Arc::new(resolver))
    }

    /// Sets an already shared runner resolver.
    #[must_use]
    pub fn with_shared_resolver(mut self, resolver: Arc<dyn RunnerResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets what happens when a watcher panics.
    #[must_use]
    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds the interceptor.
    #[must_use]
    pub fn build(self) -> Interceptor {
        let registry = self.registry.unwrap_or_else(WatcherRegistry::global);
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(RunnerDirectory::new()));

        Interceptor {
            gauge: ReentrancyGauge::new(),
            dispatcher: Dispatcher::new(registry, self.policy),
            resolver,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interceptor
// ─────────────────────────────────────────────────────────────────────────────

/// Gates watcher notification around intercepted lifecycle calls.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use lifewatch_model::{CallFrame, LifecycleKind, MethodDescriptor, RunnerHandle};
/// use lifewatch_watch::{Interceptor, RunnerDirectory, WatcherRegistry};
///
/// let directory = Arc::new(RunnerDirectory::new());
/// let interceptor = Interceptor::builder()
///     .with_registry(Arc::new(WatcherRegistry::empty()))
///     .with_shared_resolver(directory.clone())
///     .build();
///
/// let _scope = directory.enter_runner(RunnerHandle::new("FooTest runner"));
/// let method = MethodDescriptor::new("FooTest", "setup_class")
///     .with_marker(LifecycleKind::BeforeClass);
///
/// let result: Result<u32, std::io::Error> =
///     interceptor.intercept(&CallFrame::for_method(method), || Ok(42));
/// assert_eq!(result.unwrap(), 42);
/// ```
pub struct Interceptor {
    gauge: ReentrancyGauge,
    dispatcher: Dispatcher,
    resolver: Arc<dyn RunnerResolver>,
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("gauge", &self.gauge)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Interceptor {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> InterceptorBuilder {
        InterceptorBuilder::default()
    }

    /// Intercepts `call` on the calling thread.
    ///
    /// See [`intercept_in`](Self::intercept_in).
    ///
    /// # Errors
    ///
    /// Returns exactly the error `proceed` returned.
    pub fn intercept<C, T, E>(
        &self,
        call: &C,
        proceed: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        C: ReflectiveCall + ?Sized,
        E: Error + 'static,
    {
        self.intercept_in(&ExecutionContext::current(), call, proceed)
    }

    /// Intercepts `call`, attributing it to `exec`'s thread.
    ///
    /// `proceed` always runs exactly once, unless a watcher's `before` hook
    /// panics under [`DispatchPolicy::Propagate`]. In that case it never runs,
    /// watchers hear `after` with the hook's panic as the failure, and the
    /// panic unwinds to the caller.
    ///
    /// # Errors
    ///
    /// Returns exactly the error `proceed` returned.
    ///
    /// # Panics
    ///
    /// Resumes a panic raised by `proceed` once watchers have been notified,
    /// and propagates watcher panics under [`DispatchPolicy::Propagate`].
    pub fn intercept_in<C, T, E>(
        &self,
        exec: &ExecutionContext,
        call: &C,
        proceed: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        C: ReflectiveCall + ?Sized,
        E: Error + 'static,
    {
        let Some(context) = classify(call).into_particle() else {
            return proceed();
        };

        let Some(runner) = self.resolve_runner(exec, &context) else {
            tracing::debug!(method = %context.method(), "no runner resolved, bypassing watchers");
            return proceed();
        };

        let key = InvocationKey::new(exec.thread(), &runner, context.method());
        let outcome = match self.enter(&key, &runner, &context) {
            Ok(()) => panic::catch_unwind(AssertUnwindSafe(proceed)),
            Err(payload) => Err(payload),
        };
        self.exit(&key, &runner, &context, &outcome);

        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Returns `true` if `method` is a particle method.
    #[must_use]
    pub fn is_lifecycle_method(&self, method: &MethodDescriptor) -> bool {
        is_particle_method(method)
    }

    /// Returns the attached watcher whose runtime type is `W`, if any.
    #[must_use]
    pub fn attached_watcher<W: MethodWatcher>(&self) -> Option<Arc<W>> {
        self.dispatcher.registry().attached::<W>()
    }

    /// Returns the watcher registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<WatcherRegistry> {
        self.dispatcher.registry()
    }

    /// Returns the current nesting depth of `method` run by `runner` in `exec`.
    ///
    /// Only meaningful on the thread that runs the invocations.
    #[must_use]
    pub fn depth(&self, exec: &ExecutionContext, runner: &RunnerHandle, method: &MethodDescriptor) -> i64 {
        self.gauge
            .depth(&InvocationKey::new(exec.thread(), runner, method))
    }

    fn resolve_runner(
        &self,
        exec: &ExecutionContext,
        context: &InvocationContext,
    ) -> Option<RunnerHandle> {
        match context.target() {
            Some(target) => self.resolver.runner_for_target(target),
            None => self.resolver.runner_for_thread(exec.thread()),
        }
    }

    /// Records the entry and notifies `before` on the outermost one.
    ///
    /// A watcher panic is handed back so the exit path still runs.
    fn enter(
        &self,
        key: &InvocationKey,
        runner: &RunnerHandle,
        context: &InvocationContext,
    ) -> thread::Result<()> {
        if !self.gauge.enter(key) {
            tracing::trace!(method = %context.method(), "nested invocation, watchers already notified");
            return Ok(());
        }

        panic::catch_unwind(AssertUnwindSafe(|| {
            let _scope = NotifyingScope::enter(key.thread());
            self.dispatcher.notify_before(
                runner,
                context.target(),
                context.method(),
                context.params(),
            );
        }))
        .inspect_err(|_| {
            tracing::debug!(method = %context.method(), "watcher panicked before the invocation, skipping it");
        })
    }

    fn exit<T, E: Error + 'static>(
        &self,
        key: &InvocationKey,
        runner: &RunnerHandle,
        context: &InvocationContext,
        outcome: &thread::Result<Result<T, E>>,
    ) {
        if !self.gauge.exit(key) {
            return;
        }

        let failure = match outcome {
            Ok(Ok(_)) => None,
            Ok(Err(error)) => Some(InvocationFailure::Error(error)),
            Err(payload) => Some(InvocationFailure::Panic(panic_message(&**payload))),
        };

        let notified = panic::catch_unwind(AssertUnwindSafe(|| {
            let _scope = NotifyingScope::enter(key.thread());
            self.dispatcher.notify_after(
                runner,
                context.target(),
                context.method(),
                failure.as_ref(),
            );
        }));

        if let Err(payload) = notified {
            if let Some(failure) = &failure {
                tracing::error!(
                    method = %context.method(),
                    %failure,
                    "watcher panicked after a failed invocation; the invocation failure is superseded"
                );
            }
            panic::resume_unwind(payload);
        }
    }
}

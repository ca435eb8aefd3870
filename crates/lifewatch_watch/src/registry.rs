//! Watcher discovery and the watcher registry.
//!
//! The [`WatcherRegistry`] owns the set of watchers notified by the
//! dispatcher. Watchers come from [`WatcherSource`]s:
//!
//! - [`StaticSource`] - an explicit list supplied at startup
//! - [`InventorySource`] - link-time discovery of [`WatcherRegistration`]s
//!   submitted with [`inventory::submit!`]
//!
//! Discovery is lazy. The first call to [`WatcherRegistry::watchers`] runs
//! every source once under the registry's write lock; later calls clone an
//! immutable snapshot under the read lock. Dispatch iterates the snapshot
//! without holding any lock, so a watcher may itself trigger intercepted
//! calls.
//!
//! # Example: link-time registration
//!
//! ```ignore
//! use lifewatch_watch::registry::WatcherRegistration;
//!
//! inventory::submit! {
//!     WatcherRegistration::new("timing", || std::sync::Arc::new(TimingWatcher::default()))
//! }
//! ```

use core::fmt;
use std::sync::{Arc, OnceLock};

use hashbrown::HashSet;
use parking_lot::RwLock;
use thiserror::Error;

use crate::watcher::{MethodWatcher, SharedWatcher, WatcherId};

// ─────────────────────────────────────────────────────────────────────────────
// RegistrationError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during watcher registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// A watcher with this name is already registered.
    #[error("watcher '{name}' is already registered")]
    DuplicateName {
        /// The duplicate watcher name.
        name: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Sources
// ─────────────────────────────────────────────────────────────────────────────

/// A backend that produces watchers during discovery.
pub trait WatcherSource: Send + Sync + 'static {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Produces this source's watchers, in the order they should be notified.
    ///
    /// May be called more than once if the registry is asked to rediscover.
    fn discover(&self) -> Vec<SharedWatcher>;
}

/// Watchers supplied explicitly at startup.
#[derive(Default)]
pub struct StaticSource {
    watchers: Vec<SharedWatcher>,
}

impl StaticSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a watcher.
    #[must_use]
    pub fn with(mut self, watcher: impl MethodWatcher) -> Self {
        self.watchers.push(Arc::new(watcher));
        self
    }

    /// Adds an already shared watcher.
    #[must_use]
    pub fn with_shared(mut self, watcher: SharedWatcher) -> Self {
        self.watchers.push(watcher);
        self
    }
}

impl WatcherSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    fn discover(&self) -> Vec<SharedWatcher> {
        self.watchers.clone()
    }
}

/// A link-time watcher registration collected by [`InventorySource`].
pub struct WatcherRegistration {
    name: &'static str,
    create: fn() -> SharedWatcher,
}

impl WatcherRegistration {
    /// Creates a registration; `create` runs once per discovery.
    #[must_use]
    pub const fn new(name: &'static str, create: fn() -> SharedWatcher) -> Self {
        Self { name, create }
    }

    /// Returns the registration name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

inventory::collect!(WatcherRegistration);

/// Discovers every [`WatcherRegistration`] linked into the binary.
///
/// Registration order across crates is unspecified by the linker; within the
/// returned list the order is stable for a given binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct InventorySource;

impl WatcherSource for InventorySource {
    fn name(&self) -> &str {
        "inventory"
    }

    fn discover(&self) -> Vec<SharedWatcher> {
        inventory::iter::<WatcherRegistration>
            .into_iter()
            .map(|registration| {
                tracing::trace!(registration = registration.name, "instantiating watcher");
                (registration.create)()
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WatcherRegistryBuilder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for a [`WatcherRegistry`].
#[derive(Default)]
pub struct WatcherRegistryBuilder {
    explicit: Vec<SharedWatcher>,
    sources: Vec<Box<dyn WatcherSource>>,
    allow: Option<HashSet<String>>,
}

impl WatcherRegistryBuilder {
    /// Registers a watcher explicitly. Explicit watchers are notified before
    /// any discovered ones, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateName`] if an explicit watcher
    /// with the same name was already registered.
    pub fn register(
        &mut self,
        watcher: impl MethodWatcher,
    ) -> Result<&mut Self, RegistrationError> {
        self.register_shared(Arc::new(watcher))
    }

    /// Registers an already shared watcher explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateName`] if an explicit watcher
    /// with the same name was already registered.
    pub fn register_shared(
        &mut self,
        watcher: SharedWatcher,
    ) -> Result<&mut Self, RegistrationError> {
        if self
            .explicit
            .iter()
            .any(|existing| existing.name() == watcher.name())
        {
            return Err(RegistrationError::DuplicateName {
                name: watcher.name().to_owned(),
            });
        }
        self.explicit.push(watcher);
        Ok(self)
    }

    /// Adds a discovery source. Sources run in the order they were added.
    pub fn add_source(&mut self, source: impl WatcherSource) -> &mut Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Restricts the registry to watchers with the given names.
    pub fn allow_only<S: Into<String>>(&mut self, names: impl IntoIterator<Item = S>) -> &mut Self {
        self.allow = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Builds the registry. No discovery happens until first use.
    #[must_use]
    pub fn build(self) -> WatcherRegistry {
        let mut sources: Vec<Box<dyn WatcherSource>> = Vec::with_capacity(self.sources.len() + 1);
        if !self.explicit.is_empty() {
            sources.push(Box::new(StaticSource {
                watchers: self.explicit,
            }));
        }
        sources.extend(self.sources);

        WatcherRegistry {
            sources,
            allow: self.allow,
            snapshot: RwLock::new(None),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WatcherRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Lazily discovered, read-mostly set of watchers.
///
/// # Thread Safety
///
/// First discovery is serialized by a write lock and double-checked, so
/// concurrent first use discovers exactly once. Afterwards readers share an
/// `Arc` snapshot and never observe a partially built list.
pub struct WatcherRegistry {
    sources: Vec<Box<dyn WatcherSource>>,
    allow: Option<HashSet<String>>,
    snapshot: RwLock<Option<Arc<[SharedWatcher]>>>,
}

impl fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<&str> = self.sources.iter().map(|source| source.name()).collect();
        let watchers: Option<Vec<String>> = self
            .snapshot
            .read()
            .as_ref()
            .map(|snapshot| snapshot.iter().map(|w| w.name().to_owned()).collect());
        f.debug_struct("WatcherRegistry")
            .field("sources", &sources)
            .field("watchers", &watchers)
            .finish()
    }
}

impl WatcherRegistry {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> WatcherRegistryBuilder {
        WatcherRegistryBuilder::default()
    }

    /// Creates a registry with no sources.
    #[must_use]
    pub fn empty() -> Self {
        Self::builder().build()
    }

    /// Returns the process-wide registry, backed by [`InventorySource`].
    ///
    /// Hosts that need isolation (tests in particular) should build their own
    /// registry instead.
    #[must_use]
    pub fn global() -> Arc<WatcherRegistry> {
        static GLOBAL: OnceLock<Arc<WatcherRegistry>> = OnceLock::new();
        let registry = GLOBAL.get_or_init(|| {
            let mut builder = WatcherRegistry::builder();
            builder.add_source(InventorySource);
            Arc::new(builder.build())
        });
        Arc::clone(registry)
    }

    /// Returns the watchers, discovering them on first use.
    pub fn watchers(&self) -> Arc<[SharedWatcher]> {
        if let Some(snapshot) = &*self.snapshot.read() {
            return Arc::clone(snapshot);
        }

        let mut slot = self.snapshot.write();
        if let Some(snapshot) = &*slot {
            return Arc::clone(snapshot);
        }
        let discovered = self.discover();
        *slot = Some(Arc::clone(&discovered));
        discovered
    }

    /// Runs discovery again and replaces the snapshot.
    ///
    /// Dispatches already in progress finish with the previous snapshot.
    pub fn rediscover(&self) -> Arc<[SharedWatcher]> {
        let mut slot = self.snapshot.write();
        let discovered = self.discover();
        *slot = Some(Arc::clone(&discovered));
        discovered
    }

    /// Returns `true` once discovery has run.
    #[must_use]
    pub fn is_discovered(&self) -> bool {
        self.snapshot.read().is_some()
    }

    /// Returns the number of watchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.watchers().len()
    }

    /// Returns `true` if there are no watchers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watchers().is_empty()
    }

    /// Returns the watcher names in notification order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.watchers()
            .iter()
            .map(|watcher| watcher.name().to_owned())
            .collect()
    }

    /// Returns the watcher whose runtime type is `W`, if attached.
    #[must_use]
    pub fn attached<W: MethodWatcher>(&self) -> Option<Arc<W>> {
        self.attached_by_id(WatcherId::of::<W>())
            .and_then(|watcher| watcher.downcast_arc::<W>().ok())
    }

    /// Returns the watcher whose runtime type is identified by `id`, if attached.
    #[must_use]
    pub fn attached_by_id(&self, id: WatcherId) -> Option<SharedWatcher> {
        self.watchers()
            .iter()
            .find(|watcher| id.matches(watcher.as_ref()))
            .cloned()
    }

    fn discover(&self) -> Arc<[SharedWatcher]> {
        let mut names = HashSet::new();
        let mut watchers = Vec::new();

        for source in &self.sources {
            for watcher in source.discover() {
                let name = watcher.name().to_owned();
                if let Some(allow) = &self.allow
                    && !allow.contains(&name)
                {
                    tracing::debug!(watcher = %name, source = source.name(), "watcher not allowed, skipping");
                    continue;
                }
                if !names.insert(name.clone()) {
                    tracing::warn!(
                        error = %RegistrationError::DuplicateName { name },
                        source = source.name(),
                        "skipping duplicate watcher"
                    );
                    continue;
                }
                watchers.push(watcher);
            }
        }

        tracing::debug!(count = watchers.len(), "discovered watchers");
        watchers.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use lifewatch_model::{Argument, InvocationFailure, MethodDescriptor, RunnerHandle, TargetHandle};

    struct Named(&'static str);

    impl MethodWatcher for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn before_invocation(
            &self,
            _runner: &RunnerHandle,
            _target: Option<&TargetHandle>,
            _method: &MethodDescriptor,
            _params: &[Argument],
        ) {
        }

        fn after_invocation(
            &self,
            _runner: &RunnerHandle,
            _target: Option<&TargetHandle>,
            _method: &MethodDescriptor,
            _failure: Option<&InvocationFailure<'_>>,
        ) {
        }
    }

    struct Silent;

    impl MethodWatcher for Silent {
        fn before_invocation(
            &self,
            _runner: &RunnerHandle,
            _target: Option<&TargetHandle>,
            _method: &MethodDescriptor,
            _params: &[Argument],
        ) {
        }

        fn after_invocation(
            &self,
            _runner: &RunnerHandle,
            _target: Option<&TargetHandle>,
            _method: &MethodDescriptor,
            _failure: Option<&InvocationFailure<'_>>,
        ) {
        }
    }

    struct CountingSource {
        calls: Arc<AtomicUsize>,
    }

    impl WatcherSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn discover(&self) -> Vec<SharedWatcher> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            vec![Arc::new(Named("counted"))]
        }
    }

    #[test]
    fn explicit_watchers_keep_registration_order() {
        let mut builder = WatcherRegistry::builder();
        builder
            .register(Named("first"))
            .unwrap()
            .register(Named("second"))
            .unwrap()
            .register(Named("third"))
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.names(), vec!["first", "second", "third"]);
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut builder = WatcherRegistry::builder();
        builder.register(Named("logger")).unwrap();

        let result = builder.register(Named("logger"));
        assert_eq!(
            result.err(),
            Some(RegistrationError::DuplicateName {
                name: "logger".into()
            })
        );
    }

    #[test]
    fn discovery_is_lazy_and_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = WatcherRegistry::builder();
        builder.add_source(CountingSource {
            calls: Arc::clone(&calls),
        });
        let registry = builder.build();

        assert!(!registry.is_discovered());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_discovered());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        registry.rediscover();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicates_across_sources_are_skipped() {
        let mut builder = WatcherRegistry::builder();
        builder.register(Named("counted")).unwrap();
        builder.add_source(CountingSource {
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let registry = builder.build();

        assert_eq!(registry.names(), vec!["counted"]);
    }

    #[test]
    fn allow_list_filters_by_name() {
        let mut builder = WatcherRegistry::builder();
        builder
            .add_source(StaticSource::new().with(Named("kept")).with(Named("dropped")))
            .allow_only(["kept"]);
        let registry = builder.build();

        assert_eq!(registry.names(), vec!["kept"]);
    }

    #[test]
    fn attached_finds_by_runtime_type() {
        let mut builder = WatcherRegistry::builder();
        builder.register(Named("named")).unwrap();
        builder.register(Silent).unwrap();
        let registry = builder.build();

        let silent = registry.attached::<Silent>();
        assert!(silent.is_some());

        let named = registry.attached::<Named>().expect("Named is attached");
        assert_eq!(named.0, "named");
    }

    #[test]
    fn attached_is_none_when_absent() {
        let registry = WatcherRegistry::empty();
        assert!(registry.attached::<Silent>().is_none());
        assert!(registry.attached_by_id(WatcherId::of::<Silent>()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn default_name_is_type_name() {
        assert!(Silent.name().ends_with("Silent"));
    }

    #[test]
    fn concurrent_first_use_discovers_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = WatcherRegistry::builder();
        builder.add_source(CountingSource {
            calls: Arc::clone(&calls),
        });
        let registry = Arc::new(builder.build());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.watchers().len()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("thread panicked"), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

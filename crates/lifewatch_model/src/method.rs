//! Method descriptors and lifecycle markers.
//!
//! A method is a *particle* when it carries one of the five recognized
//! lifecycle markers. Every other method is invisible to watchers.

use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// LifecycleKind
// ─────────────────────────────────────────────────────────────────────────────

/// The five recognized lifecycle roles a method can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    /// A test case.
    Test,
    /// Runs before each test case.
    Before,
    /// Runs after each test case.
    After,
    /// Runs once before any test case of the class.
    BeforeClass,
    /// Runs once after all test cases of the class.
    AfterClass,
}

impl LifecycleKind {
    /// All recognized kinds, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Test,
        Self::Before,
        Self::After,
        Self::BeforeClass,
        Self::AfterClass,
    ];

    /// Returns the marker name a method carries to play this role.
    #[must_use]
    pub const fn marker_name(self) -> &'static str {
        match self {
            Self::Test => "Test",
            Self::Before => "Before",
            Self::After => "After",
            Self::BeforeClass => "BeforeClass",
            Self::AfterClass => "AfterClass",
        }
    }

    /// Parses a marker name, returning `None` for unrecognized names.
    #[must_use]
    pub fn from_marker_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.marker_name() == name)
    }

    /// Returns `true` for hooks that run once per class rather than per test.
    #[must_use]
    pub const fn is_class_level(self) -> bool {
        matches!(self, Self::BeforeClass | Self::AfterClass)
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker_name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Marker
// ─────────────────────────────────────────────────────────────────────────────

/// A marker (annotation) attached to a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Marker {
    /// One of the recognized lifecycle markers.
    Lifecycle(LifecycleKind),
    /// Any other marker, kept by name.
    Other(Arc<str>),
}

impl Marker {
    /// Creates a marker from its name, recognizing lifecycle marker names.
    #[must_use]
    pub fn named(name: &str) -> Self {
        LifecycleKind::from_marker_name(name)
            .map_or_else(|| Self::Other(Arc::from(name)), Self::Lifecycle)
    }

    /// Returns the lifecycle kind, if this is a lifecycle marker.
    #[must_use]
    pub fn lifecycle_kind(&self) -> Option<LifecycleKind> {
        match self {
            Self::Lifecycle(kind) => Some(*kind),
            Self::Other(_) => None,
        }
    }
}

impl From<LifecycleKind> for Marker {
    fn from(kind: LifecycleKind) -> Self {
        Self::Lifecycle(kind)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MethodDescriptor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct MethodInner {
    declaring_type: Arc<str>,
    name: Arc<str>,
    markers: Vec<Marker>,
}

/// Describes one method of a test class.
///
/// Cheap to clone. Two descriptors are equal when they name the same method
/// of the same declaring type; markers do not take part in identity.
///
/// # Example
///
/// ```
/// use lifewatch_model::{LifecycleKind, MethodDescriptor};
///
/// let method = MethodDescriptor::new("FooTest", "test_foo")
///     .with_marker(LifecycleKind::Test);
///
/// assert_eq!(method.lifecycle_kind(), Some(LifecycleKind::Test));
/// assert!(method.is_particle());
/// ```
#[derive(Clone)]
pub struct MethodDescriptor {
    inner: Arc<MethodInner>,
}

impl MethodDescriptor {
    /// Creates a descriptor with no markers.
    #[must_use]
    pub fn new(declaring_type: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            inner: Arc::new(MethodInner {
                declaring_type: declaring_type.into(),
                name: name.into(),
                markers: Vec::new(),
            }),
        }
    }

    /// Adds a marker.
    #[must_use]
    pub fn with_marker(mut self, marker: impl Into<Marker>) -> Self {
        Arc::make_mut(&mut self.inner).markers.push(marker.into());
        self
    }

    /// Adds several markers.
    #[must_use]
    pub fn with_markers<M: Into<Marker>>(mut self, markers: impl IntoIterator<Item = M>) -> Self {
        Arc::make_mut(&mut self.inner)
            .markers
            .extend(markers.into_iter().map(Into::into));
        self
    }

    /// Returns the name of the type declaring this method.
    #[must_use]
    pub fn declaring_type(&self) -> &str {
        &self.inner.declaring_type
    }

    /// Returns the method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns all markers in declaration order.
    #[must_use]
    pub fn markers(&self) -> &[Marker] {
        &self.inner.markers
    }

    /// Returns `true` if the method carries a marker with the given name.
    #[must_use]
    pub fn has_marker(&self, name: &str) -> bool {
        self.inner.markers.iter().any(|marker| match marker {
            Marker::Lifecycle(kind) => kind.marker_name() == name,
            Marker::Other(other) => &**other == name,
        })
    }

    /// Returns the first recognized lifecycle marker, if any.
    #[must_use]
    pub fn lifecycle_kind(&self) -> Option<LifecycleKind> {
        self.inner.markers.iter().find_map(Marker::lifecycle_kind)
    }

    /// Returns `true` if this method is a particle (carries a lifecycle marker).
    #[must_use]
    pub fn is_particle(&self) -> bool {
        self.lifecycle_kind().is_some()
    }
}

impl PartialEq for MethodDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.declaring_type == other.inner.declaring_type
                && self.inner.name == other.inner.name)
    }
}

impl Eq for MethodDescriptor {}

impl Hash for MethodDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.declaring_type.hash(state);
        self.inner.name.hash(state);
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("declaring_type", &self.inner.declaring_type)
            .field("name", &self.inner.name)
            .field("markers", &self.inner.markers)
            .finish()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.inner.declaring_type, self.inner.name)
    }
}

/// Returns `true` if `method` carries one of the five lifecycle markers.
#[must_use]
pub fn is_particle_method(method: &MethodDescriptor) -> bool {
    method.is_particle()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_lifecycle_marker_makes_a_particle() {
        for kind in LifecycleKind::ALL {
            let method = MethodDescriptor::new("FooTest", "m").with_marker(kind);
            assert!(is_particle_method(&method), "{kind} should be a particle");
            assert_eq!(method.lifecycle_kind(), Some(kind));
        }
    }

    #[test]
    fn unrelated_markers_are_not_particles() {
        let method = MethodDescriptor::new("FooTest", "helper")
            .with_markers([Marker::named("Ignore"), Marker::named("Rule")]);

        assert!(!is_particle_method(&method));
        assert!(method.has_marker("Ignore"));
        assert!(!method.has_marker("Test"));
    }

    #[test]
    fn unmarked_method_is_not_a_particle() {
        let method = MethodDescriptor::new("FooTest", "helper");
        assert!(!method.is_particle());
    }

    #[test]
    fn named_recognizes_lifecycle_names() {
        assert_eq!(
            Marker::named("BeforeClass"),
            Marker::Lifecycle(LifecycleKind::BeforeClass)
        );
        assert_eq!(Marker::named("Ignore"), Marker::Other(Arc::from("Ignore")));
        assert_eq!(LifecycleKind::from_marker_name("test"), None);
    }

    #[test]
    fn first_lifecycle_marker_wins() {
        let method = MethodDescriptor::new("FooTest", "odd")
            .with_marker(Marker::named("Ignore"))
            .with_marker(LifecycleKind::Before)
            .with_marker(LifecycleKind::Test);

        assert_eq!(method.lifecycle_kind(), Some(LifecycleKind::Before));
    }

    #[test]
    fn identity_ignores_markers() {
        let plain = MethodDescriptor::new("FooTest", "test_foo");
        let marked = MethodDescriptor::new("FooTest", "test_foo").with_marker(LifecycleKind::Test);
        let other = MethodDescriptor::new("BarTest", "test_foo");

        assert_eq!(plain, marked);
        assert_ne!(plain, other);
        assert_eq!(marked.to_string(), "FooTest::test_foo");
    }

    #[test]
    fn class_level_kinds() {
        assert!(LifecycleKind::BeforeClass.is_class_level());
        assert!(LifecycleKind::AfterClass.is_class_level());
        assert!(!LifecycleKind::Test.is_class_level());
    }
}

//! Opaque handles for runners, targets and invocation arguments.
//!
//! The interception core never looks inside the objects it is handed. It only
//! needs their identity (to key the reentrancy gauge) and the ability to pass
//! them on to watchers, which may recover the concrete type with
//! `downcast_ref`.
//!
//! Identity is allocation identity: two handles are equal if and only if they
//! wrap the same `Arc` allocation, regardless of the wrapped value.

use core::any::Any;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// HandleId
// ─────────────────────────────────────────────────────────────────────────────

/// Address-based identity of a handle's allocation.
///
/// Only meaningful while the handle is alive; used as a lookup key and never
/// dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(usize);

// ─────────────────────────────────────────────────────────────────────────────
// Opaque
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Opaque {
    value: Arc<dyn Any + Send + Sync>,
    label: Arc<str>,
}

impl Opaque {
    fn new<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        let label =
            default_label(&*value).unwrap_or_else(|| Arc::from(core::any::type_name::<T>()));
        Self { value, label }
    }

    fn id(&self) -> HandleId {
        HandleId(Arc::as_ptr(&self.value).cast::<()>().addr())
    }
}

/// Text values label themselves.
fn default_label(value: &dyn Any) -> Option<Arc<str>> {
    if let Some(text) = value.downcast_ref::<&'static str>() {
        return Some(Arc::from(*text));
    }
    value.downcast_ref::<String>().map(|text| Arc::from(text.as_str()))
}

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(Opaque);

        impl $name {
            #[doc = concat!("Wraps `value` in a new `", stringify!($name), "`.")]
            #[must_use]
            pub fn new<T: Any + Send + Sync>(value: T) -> Self {
                Self::from_arc(Arc::new(value))
            }

            #[doc = concat!("Wraps an already shared value in a `", stringify!($name), "`.")]
            ///
            /// Handles created from clones of the same `Arc` compare equal.
            #[must_use]
            pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
                Self(Opaque::new(value))
            }

            /// Replaces the label shown in logs and `Debug` output.
            ///
            /// Defaults to the wrapped text for `&'static str` and `String`
            /// values, and to the wrapped type's name otherwise.
            #[must_use]
            pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
                self.0.label = label.into();
                self
            }

            /// Returns the label shown in logs.
            #[must_use]
            pub fn label(&self) -> &str {
                &self.0.label
            }

            /// Returns the identity of the wrapped allocation.
            #[must_use]
            pub fn id(&self) -> HandleId {
                self.0.id()
            }

            /// Attempts to borrow the wrapped value as a `T`.
            #[must_use]
            pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
                self.0.value.downcast_ref::<T>()
            }

            /// Returns `true` if the wrapped value is a `T`.
            #[must_use]
            pub fn is<T: Any>(&self) -> bool {
                self.0.value.is::<T>()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.id() == other.id()
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id().hash(state);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&format_args!("{}@{:#x}", self.0.label, self.id().0))
                    .finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0.label)
            }
        }
    };
}

opaque_handle! {
    /// Identity of the test runner executing the current test class.
    RunnerHandle
}

opaque_handle! {
    /// The instance a lifecycle method runs against.
    ///
    /// Absent for class-level hooks, which have no instance.
    TargetHandle
}

opaque_handle! {
    /// A single argument of an intercepted invocation, as originally supplied.
    Argument
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Runner {
        name: &'static str,
    }

    #[test]
    fn clones_share_identity() {
        let runner = RunnerHandle::new(Runner { name: "suite" });
        let clone = runner.clone();

        assert_eq!(runner, clone);
        assert_eq!(runner.id(), clone.id());
    }

    #[test]
    fn equal_values_in_distinct_allocations_differ() {
        let first = RunnerHandle::new(7_u32);
        let second = RunnerHandle::new(7_u32);

        assert_ne!(first, second);
    }

    #[test]
    fn from_arc_preserves_identity_of_shared_value() {
        let shared = Arc::new(Runner { name: "shared" });
        let first = RunnerHandle::from_arc(Arc::clone(&shared));
        let second = RunnerHandle::from_arc(shared);

        assert_eq!(first, second);
    }

    #[test]
    fn downcast_recovers_concrete_type() {
        let runner = RunnerHandle::new(Runner { name: "suite" });

        assert!(runner.is::<Runner>());
        assert_eq!(runner.downcast_ref::<Runner>().map(|r| r.name), Some("suite"));
        assert!(runner.downcast_ref::<String>().is_none());
    }

    #[test]
    fn label_defaults_to_type_name() {
        let runner = RunnerHandle::new(Runner { name: "suite" });
        assert!(runner.label().ends_with("Runner"));

        let runner = runner.with_label("FooTest runner");
        assert_eq!(runner.label(), "FooTest runner");
        assert_eq!(runner.to_string(), "FooTest runner");
    }

    #[test]
    fn text_values_label_themselves() {
        let runner = RunnerHandle::new("FooTest runner");
        assert_eq!(runner.to_string(), "FooTest runner");

        let target = TargetHandle::new(String::from("FooTest instance"));
        assert_eq!(target.label(), "FooTest instance");
        assert!(format!("{target:?}").starts_with("TargetHandle(FooTest instance@"));
    }
}

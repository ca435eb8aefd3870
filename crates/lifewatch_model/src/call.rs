//! Intercepted calls and the invocation classifier.
//!
//! The interception shim hands the core a [`ReflectiveCall`]: an opaque view
//! of the call being made, whose fields may or may not be readable. The
//! classifier turns it into a [`Classification`]. Classification never fails;
//! anything it cannot read degrades to "no method identified" so that the
//! underlying call still proceeds.

use std::sync::Arc;

use thiserror::Error;

use crate::handle::{Argument, RunnerHandle, TargetHandle};
use crate::method::MethodDescriptor;

// ─────────────────────────────────────────────────────────────────────────────
// ExtractError
// ─────────────────────────────────────────────────────────────────────────────

/// Structural failure while reading a field of an intercepted call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The field does not exist on this call.
    #[error("call field `{0}` is missing")]
    MissingField(&'static str),
    /// The field exists but holds an unexpected type.
    #[error("call field `{field}` holds `{found}`, expected `{expected}`")]
    TypeMismatch {
        /// The field being read.
        field: &'static str,
        /// The type the classifier expected.
        expected: &'static str,
        /// The type actually found.
        found: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// ReflectiveCall
// ─────────────────────────────────────────────────────────────────────────────

/// What encloses an intercepted call.
#[derive(Debug, Clone)]
pub enum CallOwner {
    /// The call invokes a method.
    Method(MethodDescriptor),
    /// The call belongs to a runner rather than to a method.
    Runner(RunnerHandle),
    /// Any other construct, by type name.
    Other(Arc<str>),
}

/// Read access to the fields of an intercepted call.
///
/// Implemented by the interception shim. Every accessor may fail; the
/// classifier treats failures as "not a lifecycle call".
pub trait ReflectiveCall {
    /// Returns what encloses the call.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] if the owner cannot be read.
    fn owner(&self) -> Result<CallOwner, ExtractError>;

    /// Returns the instance the method runs against, if any.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] if the target cannot be read.
    fn target(&self) -> Result<Option<TargetHandle>, ExtractError>;

    /// Returns the arguments as originally supplied.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] if the arguments cannot be read.
    fn params(&self) -> Result<Vec<Argument>, ExtractError>;
}

/// A [`ReflectiveCall`] whose fields are already known.
///
/// Suitable for hosts that construct calls directly rather than reading them
/// out of a foreign object.
///
/// # Example
///
/// ```
/// use lifewatch_model::{classify, CallFrame, LifecycleKind, MethodDescriptor, TargetHandle};
///
/// let method = MethodDescriptor::new("FooTest", "test_foo").with_marker(LifecycleKind::Test);
/// let frame = CallFrame::for_method(method).with_target(TargetHandle::new(()));
///
/// assert!(classify(&frame).is_particle());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallFrame {
    owner: Option<CallOwner>,
    target: Option<TargetHandle>,
    params: Vec<Argument>,
}

impl CallFrame {
    /// Creates a frame with no owner; classifies as unreadable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a frame for a call of `method`.
    #[must_use]
    pub fn for_method(method: MethodDescriptor) -> Self {
        Self::new().with_owner(CallOwner::Method(method))
    }

    /// Creates a frame owned by a runner rather than a method.
    #[must_use]
    pub fn for_runner(runner: RunnerHandle) -> Self {
        Self::new().with_owner(CallOwner::Runner(runner))
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: CallOwner) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Sets the target instance.
    #[must_use]
    pub fn with_target(mut self, target: TargetHandle) -> Self {
        self.target = Some(target);
        self
    }

    /// Appends an argument.
    #[must_use]
    pub fn with_param(mut self, param: Argument) -> Self {
        self.params.push(param);
        self
    }

    /// Replaces all arguments.
    #[must_use]
    pub fn with_params(mut self, params: impl IntoIterator<Item = Argument>) -> Self {
        self.params = params.into_iter().collect();
        self
    }
}

impl ReflectiveCall for CallFrame {
    fn owner(&self) -> Result<CallOwner, ExtractError> {
        self.owner.clone().ok_or(ExtractError::MissingField("owner"))
    }

    fn target(&self) -> Result<Option<TargetHandle>, ExtractError> {
        Ok(self.target.clone())
    }

    fn params(&self) -> Result<Vec<Argument>, ExtractError> {
        Ok(self.params.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// InvocationContext
// ─────────────────────────────────────────────────────────────────────────────

/// The extracted facts of a particle method call.
///
/// Built once per intercepted call and immutable afterwards.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    method: MethodDescriptor,
    target: Option<TargetHandle>,
    params: Arc<[Argument]>,
}

impl InvocationContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        method: MethodDescriptor,
        target: Option<TargetHandle>,
        params: impl Into<Arc<[Argument]>>,
    ) -> Self {
        Self {
            method,
            target,
            params: params.into(),
        }
    }

    /// Returns the invoked method.
    #[must_use]
    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    /// Returns the instance the method runs against, if any.
    #[must_use]
    pub fn target(&self) -> Option<&TargetHandle> {
        self.target.as_ref()
    }

    /// Returns the arguments in their original order.
    #[must_use]
    pub fn params(&self) -> &[Argument] {
        &self.params
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Result of classifying an intercepted call.
#[derive(Debug, Clone)]
pub enum Classification {
    /// A call of a particle method; watchers may be notified.
    Particle(InvocationContext),
    /// A method call without a lifecycle marker.
    NotParticle(MethodDescriptor),
    /// The call is not owned by a method.
    NotMethod(CallOwner),
    /// The call could not be read.
    Unreadable(ExtractError),
}

impl Classification {
    /// Returns `true` for [`Classification::Particle`].
    #[must_use]
    pub fn is_particle(&self) -> bool {
        matches!(self, Self::Particle(_))
    }

    /// Returns the invocation context of a particle call.
    #[must_use]
    pub fn into_particle(self) -> Option<InvocationContext> {
        match self {
            Self::Particle(context) => Some(context),
            _ => None,
        }
    }
}

/// Classifies an intercepted call.
///
/// Extraction errors never escape: they are logged and reported as
/// [`Classification::Unreadable`].
pub fn classify<C: ReflectiveCall + ?Sized>(call: &C) -> Classification {
    match read_particle(call) {
        Ok(classification) => classification,
        Err(error) => {
            tracing::debug!(%error, "intercepted call is unreadable, bypassing");
            Classification::Unreadable(error)
        }
    }
}

fn read_particle<C: ReflectiveCall + ?Sized>(call: &C) -> Result<Classification, ExtractError> {
    let method = match call.owner()? {
        CallOwner::Method(method) => method,
        owner => return Ok(Classification::NotMethod(owner)),
    };

    let target = call.target()?;
    let params = call.params()?;

    if !method.is_particle() {
        return Ok(Classification::NotParticle(method));
    }

    Ok(Classification::Particle(InvocationContext::new(
        method, target, params,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{LifecycleKind, Marker};

    struct BrokenCall {
        owner: Result<CallOwner, ExtractError>,
        target: Result<Option<TargetHandle>, ExtractError>,
    }

    impl ReflectiveCall for BrokenCall {
        fn owner(&self) -> Result<CallOwner, ExtractError> {
            self.owner.clone()
        }

        fn target(&self) -> Result<Option<TargetHandle>, ExtractError> {
            self.target.clone()
        }

        fn params(&self) -> Result<Vec<Argument>, ExtractError> {
            Ok(Vec::new())
        }
    }

    fn test_method() -> MethodDescriptor {
        MethodDescriptor::new("FooTest", "test_foo").with_marker(LifecycleKind::Test)
    }

    #[test]
    fn particle_call_extracts_target_and_params() {
        let target = TargetHandle::new("instance");
        let frame = CallFrame::for_method(test_method())
            .with_target(target.clone())
            .with_param(Argument::new(1_i32))
            .with_param(Argument::new("two"));

        let context = classify(&frame)
            .into_particle()
            .expect("test method should be a particle");

        assert_eq!(context.method(), &test_method());
        assert_eq!(context.target(), Some(&target));
        assert_eq!(context.params().len(), 2);
        assert_eq!(context.params()[0].downcast_ref::<i32>(), Some(&1));
    }

    #[test]
    fn class_hook_without_target_is_a_particle() {
        let method = MethodDescriptor::new("FooTest", "setup_class")
            .with_marker(LifecycleKind::BeforeClass);

        let context = classify(&CallFrame::for_method(method))
            .into_particle()
            .expect("class hook should be a particle");

        assert!(context.target().is_none());
        assert!(context.params().is_empty());
    }

    #[test]
    fn unmarked_method_is_not_a_particle() {
        let method = MethodDescriptor::new("FooTest", "helper").with_marker(Marker::named("Ignore"));

        assert!(matches!(
            classify(&CallFrame::for_method(method)),
            Classification::NotParticle(_)
        ));
    }

    #[test]
    fn runner_owned_call_is_not_a_method() {
        let frame = CallFrame::for_runner(RunnerHandle::new(()));
        assert!(matches!(
            classify(&frame),
            Classification::NotMethod(CallOwner::Runner(_))
        ));
    }

    #[test]
    fn missing_owner_degrades_to_unreadable() {
        assert!(matches!(
            classify(&CallFrame::new()),
            Classification::Unreadable(ExtractError::MissingField("owner"))
        ));
    }

    #[test]
    fn type_mismatch_on_target_degrades_to_unreadable() {
        let call = BrokenCall {
            owner: Ok(CallOwner::Method(test_method())),
            target: Err(ExtractError::TypeMismatch {
                field: "target",
                expected: "TargetHandle",
                found: "i64".into(),
            }),
        };

        let classification = classify(&call);
        assert!(!classification.is_particle());
        assert!(matches!(
            classification,
            Classification::Unreadable(ExtractError::TypeMismatch { field: "target", .. })
        ));
    }

    #[test]
    fn classify_accepts_trait_objects() {
        let frame = CallFrame::for_method(test_method());
        let call: &dyn ReflectiveCall = &frame;
        assert!(classify(call).is_particle());
    }
}

//! Failure descriptors handed to watchers after an invocation.

use core::any::Any;
use core::error::Error;
use core::fmt;

/// How an intercepted invocation failed.
///
/// Borrowed from the held outcome for the duration of the `after` dispatch;
/// watchers that need to keep it should copy what they need.
#[derive(Debug, Clone, Copy)]
pub enum InvocationFailure<'a> {
    /// The invocation returned an error.
    Error(&'a (dyn Error + 'static)),
    /// The invocation panicked with the given message.
    Panic(&'a str),
}

impl<'a> InvocationFailure<'a> {
    /// Returns `true` if the invocation panicked.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panic(_))
    }

    /// Returns the returned error, if the invocation failed with one.
    #[must_use]
    pub fn as_error(&self) -> Option<&'a (dyn Error + 'static)> {
        match *self {
            Self::Error(error) => Some(error),
            Self::Panic(_) => None,
        }
    }

    /// Attempts to recover the concrete error type.
    #[must_use]
    pub fn downcast_error<E: Error + 'static>(&self) -> Option<&'a E> {
        self.as_error().and_then(|error| error.downcast_ref::<E>())
    }
}

impl fmt::Display for InvocationFailure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => write!(f, "{error}"),
            Self::Panic(message) => write!(f, "panicked: {message}"),
        }
    }
}

/// Extracts the message from a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "Box<dyn Any>"
    }
}

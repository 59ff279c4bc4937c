use thiserror::Error;

/// A checked write tried to bind the reserved render-context name.
///
/// Only the offending insert fails; bindings applied before it stay in place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{key:?} is a reserved word")]
pub struct ReservedKeyViolation {
    pub key: String,
}

/// Whole-map enumeration is deliberately not provided by [`ScopedEnv`].
///
/// Nothing on the render path needs it; callers must not depend on it.
///
/// [`ScopedEnv`]: crate::env::ScopedEnv
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("scoped environments do not support {operation}")]
pub struct UnsupportedOperation {
    pub operation: &'static str,
}

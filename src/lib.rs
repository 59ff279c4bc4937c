//! Chained variable scopes for template fragment rendering.
//!
//! [`ScopedEnv`] is a map-like layer of bindings that falls back to an
//! enclosing layer on lookup, with a per-layer policy for where writes land.
//! [`RenderStack`] wraps scope creation and teardown around rendering a named
//! fragment, restoring the previous scope and fragment identifier on every
//! exit path.

pub mod env;
pub mod render;
mod util;

pub use env::{ReservedKeyViolation, ScopedEnv, UnsupportedOperation, WritePolicy};
pub use render::{FragmentRenderer, RenderError, RenderStack};

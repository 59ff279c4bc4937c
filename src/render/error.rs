use thiserror::Error;
use crate::env::ReservedKeyViolation;

/// Failure of a [`RenderStack`] operation.
///
/// An engine failure is passed through untouched; the stack guarantees its
/// state is restored before the error reaches the caller.
///
/// [`RenderStack`]: crate::render::RenderStack
#[derive(Debug, Error)]
pub enum RenderError<E> {
    #[error(transparent)]
    ReservedKey(#[from] ReservedKeyViolation),
    #[error(transparent)]
    Engine(E),
}

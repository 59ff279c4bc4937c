use std::cell::RefCell;
use std::rc::Rc;
use log::trace;
use crate::env::{ScopedEnv, WritePolicy};

pub mod error;

pub use error::RenderError;

/// Engine-supplied capability that produces the text of one named fragment,
/// resolving variables against `env`. `ctx` is the calling stack, handed back
/// so the fragment body can render nested fragments or scoped blocks through
/// it.
pub trait FragmentRenderer<V>: Sized {
    type Error;

    fn render_fragment(
        &self,
        ctx: &RenderStack<V, Self>,
        fragment_id: &str,
        env: &ScopedEnv<V>,
    ) -> Result<String, Self::Error>;
}

/// Save/restore discipline around fragment rendering.
///
/// Holds the identifier of the fragment being rendered "now" and the active
/// environment for the in-flight render. Both are swapped for the duration of
/// a [`render_fragment`](RenderStack::render_fragment) or
/// [`run_scoped_block`](RenderStack::run_scoped_block) call and restored on
/// every exit path, so a fragment's local bindings never leak back into the
/// caller's scope.
///
/// One stack serves one logical render execution; concurrent renders each get
/// their own root environment and their own stack.
pub struct RenderStack<V, R> {
    renderer: R,
    state: RefCell<State<V>>,
}

struct State<V> {
    fragment_id: Rc<str>,
    env: ScopedEnv<V>,
}

impl<V, R: FragmentRenderer<V>> RenderStack<V, R> {
    pub fn new(renderer: R, root: ScopedEnv<V>, fragment_id: impl Into<Rc<str>>) -> Self {
        Self {
            renderer,
            state: RefCell::new(State {
                fragment_id: fragment_id.into(),
                env: root,
            }),
        }
    }

    /// Identifier of the fragment currently being rendered.
    pub fn current_fragment_id(&self) -> Rc<str> {
        self.state.borrow().fragment_id.clone()
    }

    /// The environment the in-flight render resolves variables against.
    pub fn current_environment(&self) -> ScopedEnv<V> {
        self.state.borrow().env.clone()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Renders `fragment_id` in a fresh child scope with no extra bindings.
    pub fn render_fragment(&self, fragment_id: &str) -> Result<String, RenderError<R::Error>> {
        self.render_fragment_with(fragment_id, std::iter::empty())
    }

    /// Renders `fragment_id` in a fresh [`WritePolicy::ShadowLocal`] child of
    /// the current environment, seeded with `bindings`.
    ///
    /// A [`ReservedKeyViolation`] in `bindings` aborts before any rendering
    /// happens and before the stack state changes. Whatever the renderer
    /// raises is propagated untouched, after the prior
    /// `(fragment_id, environment)` pair has been restored; restoration also
    /// runs on success and on unwinding.
    ///
    /// [`ReservedKeyViolation`]: crate::env::ReservedKeyViolation
    pub fn render_fragment_with<I>(
        &self,
        fragment_id: &str,
        bindings: I,
    ) -> Result<String, RenderError<R::Error>>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let child = self.current_environment().child(WritePolicy::ShadowLocal);
        child.insert_all(bindings)?;

        let _frame = Frame::enter(&self.state, child.clone(), Some(fragment_id));
        self.renderer
            .render_fragment(self, fragment_id, &child)
            .map_err(RenderError::Engine)
    }

    /// Runs `block` against a fresh [`WritePolicy::UpdateAncestorIfPresent`]
    /// child of the current environment, leaving `current_fragment_id`
    /// unchanged. For non-fragment nested scopes such as loop bodies:
    /// assignments to names the outer scope already owns update the outer
    /// binding, fresh names stay local to the block. Same unconditional
    /// restore as fragment rendering.
    pub fn run_scoped_block<T, E>(
        &self,
        block: impl FnOnce(&ScopedEnv<V>) -> Result<T, E>,
    ) -> Result<T, E> {
        let child = self
            .current_environment()
            .child(WritePolicy::UpdateAncestorIfPresent);
        let _frame = Frame::enter(&self.state, child.clone(), None);
        block(&child)
    }
}

/// Swaps the stack state in on construction and back out on drop, so the
/// snapshot is restored on return, on error, and on unwinding alike.
struct Frame<'a, V> {
    state: &'a RefCell<State<V>>,
    saved: Option<State<V>>,
}

impl<'a, V> Frame<'a, V> {
    fn enter(state: &'a RefCell<State<V>>, env: ScopedEnv<V>, fragment_id: Option<&str>) -> Self {
        let mut current = state.borrow_mut();
        let fragment_id = match fragment_id {
            Some(id) => {
                trace!("entering fragment {id:?} (from {:?})", current.fragment_id);
                Rc::from(id)
            }
            None => current.fragment_id.clone(),
        };
        let saved = std::mem::replace(&mut *current, State { fragment_id, env });
        drop(current);
        Frame {
            state,
            saved: Some(saved),
        }
    }
}

impl<V> Drop for Frame<'_, V> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            trace!("restoring render frame {:?}", saved.fragment_id);
            *self.state.borrow_mut() = saved;
        }
    }
}

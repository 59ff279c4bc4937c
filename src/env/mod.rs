use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use hashbrown::HashMap;
use crate::util;

pub mod error;

pub use error::{ReservedKeyViolation, UnsupportedOperation};

/// Where a write through [`ScopedEnv::insert`] lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Every write goes to the local layer, shadowing any ancestor binding.
    ShadowLocal,
    /// A write to a name some enclosing layer already owns updates that
    /// layer's binding in place; fresh names stay local.
    UpdateAncestorIfPresent,
}

/// One layer of variable bindings chained to an optional enclosing layer.
///
/// Lookups resolve against the local layer first and fall back to the parent
/// chain. A handle is cheap to clone; clones share the same layer. Each child
/// keeps its parent alive, so a layer never outlives the chain above it.
///
/// `V` is whatever the template engine stores; it is held and handed back
/// unchanged.
pub struct ScopedEnv<V> {
    inner: Rc<RefCell<Layer<V>>>,
}

struct Layer<V> {
    local: HashMap<String, V>,
    parent: Option<ScopedEnv<V>>,
    policy: WritePolicy,
    reserved: Rc<str>,
}

impl<V> ScopedEnv<V> {
    /// Root of a new environment tree. `reserved_key` is the one name the
    /// engine keeps for its render-context handle; no checked write anywhere
    /// in the tree may bind it.
    pub fn root(reserved_key: impl Into<Rc<str>>) -> Self {
        Self::layer(None, WritePolicy::ShadowLocal, reserved_key.into())
    }

    /// New empty layer over `self`, inheriting the reserved key.
    pub fn child(&self, policy: WritePolicy) -> Self {
        let reserved = self.inner.borrow().reserved.clone();
        Self::layer(Some(self.clone()), policy, reserved)
    }

    fn layer(parent: Option<Self>, policy: WritePolicy, reserved: Rc<str>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Layer {
                local: HashMap::new(),
                parent,
                policy,
                reserved,
            })),
        }
    }

    /// The name reserved for the engine's render-context handle, as
    /// configured at the root of this tree.
    pub fn reserved_key(&self) -> Rc<str> {
        self.inner.borrow().reserved.clone()
    }

    /// True if the key is bound in this layer or any enclosing one.
    pub fn contains(&self, key: &str) -> bool {
        let layer = self.inner.borrow();
        layer.local.contains_key(key)
            || layer.parent.as_ref().map_or(false, |p| p.contains(key))
    }

    /// Binds `key` in the tree, returning the binding it replaced, if any.
    ///
    /// Under [`WritePolicy::UpdateAncestorIfPresent`] a key the parent chain
    /// already contains is handed one layer up, where the parent applies its
    /// own policy in turn; a [`WritePolicy::ShadowLocal`] layer along the way
    /// absorbs the write, so it never escapes that layer's scope. Fresh keys
    /// land locally. The reserved key is rejected on every layer.
    pub fn insert(&self, key: impl Into<String>, value: V) -> Result<Option<V>, ReservedKeyViolation> {
        let key = key.into();
        let reserved = self.inner.borrow().reserved.clone();
        if *key == *reserved {
            return Err(ReservedKeyViolation { key });
        }
        Ok(self.write(key, value))
    }

    /// Local write that skips the reserved-key check. This is how the engine
    /// seeds its own bindings, including the render-context handle itself.
    pub fn insert_unchecked(&self, key: impl Into<String>, value: V) -> Option<V> {
        self.inner.borrow_mut().local.insert(key.into(), value)
    }

    /// Applies [`insert`](Self::insert) to each entry in order.
    ///
    /// On a [`ReservedKeyViolation`] the operation stops at the offending
    /// entry: earlier entries remain applied and later ones are never
    /// attempted. There is no rollback.
    pub fn insert_all<I>(&self, entries: I) -> Result<(), ReservedKeyViolation>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        for (key, value) in entries {
            self.insert(key, value)?;
        }
        Ok(())
    }

    // Delegates one hop at a time: the parent applies its own policy, so an
    // intervening ShadowLocal layer keeps the write from escaping its scope.
    fn write(&self, key: String, value: V) -> Option<V> {
        let forward = {
            let layer = self.inner.borrow();
            match layer.policy {
                WritePolicy::UpdateAncestorIfPresent => {
                    layer.parent.as_ref().filter(|p| p.contains(&key)).cloned()
                }
                WritePolicy::ShadowLocal => None,
            }
        };
        match forward {
            Some(parent) => parent.write(key, value),
            None => self.inner.borrow_mut().local.insert(key, value),
        }
    }

    /// Unbinds `key` from the local layer only; an ancestor's binding of the
    /// same name is left alone (and becomes visible again).
    pub fn remove(&self, key: &str) -> Option<V> {
        self.inner.borrow_mut().local.remove(key)
    }

    /// True iff this layer and every enclosing layer hold no bindings.
    pub fn is_empty(&self) -> bool {
        let layer = self.inner.borrow();
        layer.local.is_empty()
            && layer.parent.as_ref().map_or(true, |p| p.is_empty())
    }

    /// Whether two handles refer to the same layer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // Whole-map enumeration is intentionally unsupported; the render path
    // never needs it and emulating it across the chain invites misuse.

    pub fn keys(&self) -> Result<Vec<String>, UnsupportedOperation> {
        Err(UnsupportedOperation { operation: "keys" })
    }

    pub fn values(&self) -> Result<Vec<V>, UnsupportedOperation> {
        Err(UnsupportedOperation { operation: "values" })
    }

    pub fn entries(&self) -> Result<Vec<(String, V)>, UnsupportedOperation> {
        Err(UnsupportedOperation { operation: "entries" })
    }

    pub fn len(&self) -> Result<usize, UnsupportedOperation> {
        Err(UnsupportedOperation { operation: "len" })
    }
}

impl<V: Clone> ScopedEnv<V> {
    /// Resolves `key` against the local layer, then the parent chain.
    ///
    /// Absence is a normal outcome, not an error. Presence is keyed on the
    /// map entry, not the value, so a binding whose value is an explicit
    /// empty/falsy marker still shadows an ancestor's binding.
    pub fn lookup(&self, key: &str) -> Option<V> {
        let layer = self.inner.borrow();
        if let Some(value) = layer.local.get(key) {
            return Some(value.clone());
        }
        layer.parent.as_ref().and_then(|p| p.lookup(key))
    }
}

impl<V: Hash> ScopedEnv<V> {
    /// Structural hash of the chain, for test/debug comparison alongside
    /// [`PartialEq`]. Local entries are folded order-independently.
    pub fn fingerprint(&self) -> u64 {
        let layer = self.inner.borrow();
        let local = layer
            .local
            .iter()
            .fold(0u64, |acc, entry| acc ^ util::hash(&entry));
        let parent = layer.parent.as_ref().map(|p| p.fingerprint());
        util::hash(&(local, parent))
    }
}

impl<V> Clone for ScopedEnv<V> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

/// Deep structural comparison: local stores and parent chains must match.
/// Test/debug only; never on the render path.
impl<V: PartialEq> PartialEq for ScopedEnv<V> {
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        let a = self.inner.borrow();
        let b = other.inner.borrow();
        a.local == b.local
            && match (&a.parent, &b.parent) {
                (None, None) => true,
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
    }
}

impl<V: Eq> Eq for ScopedEnv<V> {}

impl<V: fmt::Debug> fmt::Debug for ScopedEnv<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layer = self.inner.borrow();
        f.debug_struct("ScopedEnv")
            .field("policy", &layer.policy)
            .field("local", &layer.local)
            .field("parent", &layer.parent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use super::*;

    const CTX: &str = "render_ctx";

    fn root_with(entries: &[(&str, i64)]) -> ScopedEnv<i64> {
        let root = ScopedEnv::root(CTX);
        for (key, value) in entries {
            root.insert(*key, *value).unwrap();
        }
        root
    }

    #[test]
    fn shadowing_leaves_parent_untouched() {
        let parent = root_with(&[("x", 1)]);
        let child = parent.child(WritePolicy::ShadowLocal);
        child.insert("x", 2).unwrap();

        assert_eq!(child.lookup("x"), Some(2));
        assert_eq!(parent.lookup("x"), Some(1));
    }

    #[test]
    fn update_policy_writes_through_to_owner() {
        let parent = root_with(&[("x", 1)]);
        let child = parent.child(WritePolicy::UpdateAncestorIfPresent);
        let previous = child.insert("x", 2).unwrap();

        assert_eq!(previous, Some(1));
        assert_eq!(child.lookup("x"), Some(2));
        assert_eq!(parent.lookup("x"), Some(2));
    }

    #[test]
    fn update_policy_keeps_fresh_keys_local() {
        let parent = root_with(&[("x", 1)]);
        let child = parent.child(WritePolicy::UpdateAncestorIfPresent);
        child.insert("y", 9).unwrap();

        assert_eq!(child.lookup("y"), Some(9));
        assert!(!parent.contains("y"));
    }

    #[test]
    fn shadow_layer_absorbs_write_through_from_below() {
        let root = root_with(&[("x", 1)]);
        let mid = root.child(WritePolicy::ShadowLocal);
        let leaf = mid.child(WritePolicy::UpdateAncestorIfPresent);
        leaf.insert("x", 7).unwrap();

        // The write is handed to mid, whose ShadowLocal policy keeps it
        // there; the binding above is never touched.
        assert_eq!(root.lookup("x"), Some(1));
        assert_eq!(mid.lookup("x"), Some(7));
        assert_eq!(leaf.lookup("x"), Some(7));
    }

    #[test]
    fn update_policy_chains_through_update_layers() {
        let root = root_with(&[("x", 1)]);
        let mid = root.child(WritePolicy::UpdateAncestorIfPresent);
        let leaf = mid.child(WritePolicy::UpdateAncestorIfPresent);
        leaf.insert("x", 7).unwrap();

        // Every layer between leaf and the owner forwards, so the root
        // binding is the one updated.
        assert_eq!(root.lookup("x"), Some(7));
        assert!(mid.remove("x").is_none());
    }

    #[test]
    fn reserved_key_is_rejected_under_both_policies() {
        let root = root_with(&[]);
        for policy in [WritePolicy::ShadowLocal, WritePolicy::UpdateAncestorIfPresent] {
            let child = root.child(policy);
            let err = child.insert(CTX, 1).unwrap_err();
            assert_eq!(err, ReservedKeyViolation { key: CTX.to_owned() });
        }
        assert!(!root.contains(CTX));
    }

    #[test]
    fn reserved_key_is_rejected_at_depth() {
        let mut env = root_with(&[]);
        for _ in 0..6 {
            env = env.child(WritePolicy::ShadowLocal);
        }
        assert!(env.insert(CTX, 1).is_err());
    }

    #[test]
    fn children_inherit_the_reserved_key() {
        let root = root_with(&[]);
        let child = root
            .child(WritePolicy::ShadowLocal)
            .child(WritePolicy::UpdateAncestorIfPresent);
        assert_eq!(&*child.reserved_key(), CTX);
    }

    #[test]
    fn unchecked_insert_seeds_the_reserved_binding() {
        let root = root_with(&[]);
        assert_eq!(root.insert_unchecked(CTX, 42), None);
        assert_eq!(root.lookup(CTX), Some(42));
    }

    #[test]
    fn bulk_insert_applies_until_the_violation() {
        let root = root_with(&[]);
        let err = root
            .insert_all(vec![
                ("a".to_owned(), 1),
                (CTX.to_owned(), 2),
                ("b".to_owned(), 3),
            ])
            .unwrap_err();

        assert_eq!(err.key, CTX);
        assert_eq!(root.lookup("a"), Some(1));
        assert!(!root.contains("b"));
    }

    #[test]
    fn lookup_resolves_through_deep_chains() {
        let root = root_with(&[("depth", 0)]);
        let mut env = root.clone();
        for _ in 0..5 {
            env = env.child(WritePolicy::ShadowLocal);
        }
        assert_eq!(env.lookup("depth"), Some(0));
        assert!(env.contains("depth"));
        assert_eq!(env.lookup("missing"), None);
    }

    #[test]
    fn explicit_empty_marker_shadows_inherited_binding() {
        let parent: ScopedEnv<Option<&str>> = ScopedEnv::root(CTX);
        parent.insert("x", Some("outer")).unwrap();
        let child = parent.child(WritePolicy::ShadowLocal);
        child.insert("x", None).unwrap();

        // The child's entry is present, so its empty marker wins.
        assert_eq!(child.lookup("x"), Some(None));
        assert_eq!(parent.lookup("x"), Some(Some("outer")));
    }

    #[test]
    fn remove_only_touches_the_local_layer() {
        let parent = root_with(&[("x", 1)]);
        let child = parent.child(WritePolicy::ShadowLocal);
        child.insert("x", 2).unwrap();

        assert_eq!(child.remove("x"), Some(2));
        // The ancestor binding is visible again.
        assert_eq!(child.lookup("x"), Some(1));
        assert_eq!(child.remove("x"), None);
        assert_eq!(parent.lookup("x"), Some(1));
    }

    #[test]
    fn is_empty_consults_the_whole_chain() {
        let root = root_with(&[]);
        let child = root.child(WritePolicy::ShadowLocal);
        assert!(child.is_empty());

        root.insert("x", 1).unwrap();
        assert!(!child.is_empty());
    }

    #[test]
    fn enumeration_fails_fast() {
        let root = root_with(&[("a", 1)]);
        assert!(root.keys().is_err());
        assert!(root.values().is_err());
        assert!(root.entries().is_err());
        assert_eq!(root.len().unwrap_err().operation, "len");
    }

    #[test]
    fn equality_is_structural_over_the_chain() {
        let a = root_with(&[("x", 1)]);
        let b = root_with(&[("x", 1)]);
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
        assert_eq!(a.fingerprint(), b.fingerprint());

        let child_a = a.child(WritePolicy::ShadowLocal);
        let child_b = b.child(WritePolicy::ShadowLocal);
        assert_eq!(child_a, child_b);

        b.insert("y", 2).unwrap();
        assert_ne!(a, b);
        assert_ne!(child_a, child_b);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}

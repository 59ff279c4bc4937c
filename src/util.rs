use std::hash::{Hash, Hasher};
use ahash::AHasher;

#[inline]
pub(crate) fn hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = AHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

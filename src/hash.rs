//! Zero-sized hash builder for the form's internal maps.
//!
//! Paths, subscriber ids and attempt counters are hashed constantly on the
//! notification hot path. None of those keys come from an adversary, so the
//! maps use foldhash with a fixed seed instead of SipHash.

use std::collections::HashMap;
use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};
use indexmap::{IndexMap, IndexSet};

/// A zero-sized BuildHasher that uses foldhash with a fixed seed.
#[derive(Clone, Copy, Debug, Default)]
pub struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x517cc1b727220a95).build_hasher()
    }
}

/// Unordered map keyed with [`FastHashBuilder`].
pub type FastHashMap<K, V> = HashMap<K, V, FastHashBuilder>;

/// Insertion-ordered map keyed with [`FastHashBuilder`].
pub type FastIndexMap<K, V> = IndexMap<K, V, FastHashBuilder>;

/// Insertion-ordered set keyed with [`FastHashBuilder`].
pub type FastIndexSet<T> = IndexSet<T, FastHashBuilder>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_hash_builder_is_zero_sized() {
        assert_eq!(std::mem::size_of::<FastHashBuilder>(), 0);
    }

    #[test]
    fn index_map_keeps_insertion_order() {
        let mut map: FastIndexMap<&str, u32> = FastIndexMap::default();
        map.insert("lastName", 2);
        map.insert("firstName", 1);
        map.insert("age", 3);

        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, ["lastName", "firstName", "age"]);
    }

    #[test]
    fn hashing_is_deterministic_across_builders() {
        assert_eq!(
            FastHashBuilder.hash_one("users.0.name"),
            FastHashBuilder.hash_one("users.0.name")
        );
    }
}

//! Fast hash map and hash set type aliases.
//!
//! The watcher keys its registration table by directory path and its
//! directory snapshots by entry name. Both are string-like keys hashed on
//! every scan cycle, so they use the Fx hash from `rustc-hash`.
//!
//! # Examples
//!
//! ```
//! use pw_core::{FxHashMap, fx_hash_map};
//!
//! let mut map: FxHashMap<String, u64> = fx_hash_map();
//! map.insert("a.txt".to_owned(), 1);
//! assert_eq!(map.get("a.txt"), Some(&1));
//! ```

/// A [`HashMap`](std::collections::HashMap) using the Fx hash algorithm.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// A [`HashSet`](std::collections::HashSet) using the Fx hash algorithm.
pub type FxHashSet<V> = rustc_hash::FxHashSet<V>;

/// Creates a new empty [`FxHashMap`].
#[inline]
#[must_use]
pub fn fx_hash_map<K, V>() -> FxHashMap<K, V> {
    FxHashMap::default()
}

/// Creates a new empty [`FxHashSet`].
#[inline]
#[must_use]
pub fn fx_hash_set<V>() -> FxHashSet<V> {
    FxHashSet::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fx_hash_set_dedups() {
        let mut set: FxHashSet<&str> = fx_hash_set();
        set.insert("a");
        set.insert("a");
        assert_eq!(set.len(), 1);
    }
}

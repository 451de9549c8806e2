//! Exposes collection types configured with our chosen randomness
//! source, as well as a handful of convenience constructors.
//!
//! The `HashMap`/`HashSet` hasher is abstracted behind a feature flag
//! so deployments can pick a faster non-cryptographic hash.

use std::collections::hash_map::RandomState as StdRandomState;
use std::hash::BuildHasherDefault;

#[cfg(feature = "collections_randomstate_twox_hash")]
use twox_hash::XxHash64;

pub use linked_hash_map::LinkedHashMap as OrderedMap;
pub use intmap::IntMap;

#[cfg(feature = "collections_randomstate_twox_hash")]
pub type RandomState = BuildHasherDefault<XxHash64>;

#[cfg(not(feature = "collections_randomstate_twox_hash"))]
pub type RandomState = StdRandomState;

pub type HashMap<K, V> = std::collections::HashMap<K, V, RandomState>;
pub type HashSet<K> = std::collections::HashSet<K, RandomState>;

/// Constructs an empty `HashMap` with our chosen hasher.
pub fn hash_map<K, V>() -> HashMap<K, V> {
    HashMap::default()
}

/// Constructs an empty `HashMap` pre-sized for `capacity` entries.
pub fn hash_map_capacity<K, V>(capacity: usize) -> HashMap<K, V> {
    HashMap::with_capacity_and_hasher(capacity, RandomState::default())
}

/// Constructs an empty `HashSet` with our chosen hasher.
pub fn hash_set<K>() -> HashSet<K> {
    HashSet::default()
}

/// Constructs an empty insertion-ordered map, used where iteration
/// order over pending state must match arrival order (e.g. the
/// pending-login table at a C2S link).
pub fn ordered_map<K: std::hash::Hash + Eq, V>() -> OrderedMap<K, V> {
    OrderedMap::new()
}

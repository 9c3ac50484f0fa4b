//! Hash map aliases used across the crate.
//!
//! The default build hashes with `rustc-hash`; the `std-hash` feature swaps in
//! the standard library hashers. Insertion-ordered maps go through [`ordered`].

#[cfg(feature = "std-hash")]
pub mod map {
    pub use std::collections::hash_map::Entry;
    pub use std::collections::{HashMap, HashSet};
}

#[cfg(not(feature = "std-hash"))]
pub mod map {
    pub use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
    pub use std::collections::hash_map::Entry;
}

#[cfg(feature = "std-hash")]
pub mod ordered {
    pub type IndexMap<K, V> = indexmap::IndexMap<K, V>;
    pub type IndexSet<T> = indexmap::IndexSet<T>;
}

#[cfg(not(feature = "std-hash"))]
pub mod ordered {
    pub type IndexMap<K, V> = indexmap::IndexMap<K, V, rustc_hash::FxBuildHasher>;
    pub type IndexSet<T> = indexmap::IndexSet<T, rustc_hash::FxBuildHasher>;
}

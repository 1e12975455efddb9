//! In-memory indexes for the comparator and the duplicate grouper
//!
//! [`HashMap`] is gxhash-backed when the `gxhash` feature is on (it needs
//! AES-NI/SSE2 or NEON) and falls back to the std hasher otherwise.

use std::hash::Hash;

#[cfg(feature = "gxhash")]
pub use gxhash::{HashMap, HashMapExt};

#[cfg(not(feature = "gxhash"))]
pub use std::collections::HashMap;

/// `new`/`with_capacity` for the std fallback, as gxhash provides them
#[cfg(not(feature = "gxhash"))]
pub trait HashMapExt {
    fn new() -> Self;

    fn with_capacity(capacity: usize) -> Self;
}

#[cfg(not(feature = "gxhash"))]
impl<K, V> HashMapExt for HashMap<K, V> {
    fn new() -> Self {
        Default::default()
    }

    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity_and_hasher(capacity, Default::default())
    }
}

/// Position of the first item for every key
///
/// Later items with an already indexed key are skipped, so lookups resolve
/// to the earliest entry in `items`.
pub fn first_positions<'a, T, K, F>(items: &'a [T], key: F) -> HashMap<K, usize>
where
    K: Eq + Hash,
    F: Fn(&'a T) -> K,
{
    let mut index = HashMap::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        index.entry(key(item)).or_insert(position);
    }
    index
}

/// Items grouped by key, each group in input order
pub fn group_by<'a, T, K, F>(items: &'a [T], key: F) -> HashMap<K, Vec<&'a T>>
where
    K: Eq + Hash,
    F: Fn(&'a T) -> Option<K>,
{
    let mut groups: HashMap<K, Vec<&'a T>> = HashMap::with_capacity(items.len());
    for item in items {
        if let Some(key) = key(item) {
            groups.entry(key).or_default().push(item);
        }
    }
    groups
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Memoized predicate queries over the node set.
//!
//! Results are keyed by `(predicate key, store version)`: every store
//! mutation bumps the version, so stale entries can never be returned —
//! they simply stop matching and age out of the LRU. This is conservative
//! invalidation; a mutation that could not have affected a predicate still
//! costs that predicate one recomputation.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::ident::NodeId;
use crate::store::NodeView;

/// A node predicate with a stable identity.
///
/// `cache_key` must uniquely identify the predicate *and its parameters*;
/// two predicates returning different results for the same node must not
/// share a key.
pub trait NodePredicate {
    /// Stable identity used for memoization.
    fn cache_key(&self) -> &str;
    /// Whether the node matches.
    fn matches(&self, node: &NodeView<'_>) -> bool;
}

/// Hit/miss/eviction counters for the filter cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from cache.
    pub hits: u64,
    /// Lookups that had to recompute.
    pub misses: u64,
    /// Entries pushed out by the capacity bound.
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate in `0.0..=1.0`; zero when no lookups happened.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub(crate) struct FilterCache {
    entries: LruCache<(String, u64), Arc<[NodeId]>>,
    stats: CacheStats,
}

impl FilterCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            stats: CacheStats::default(),
        }
    }

    pub(crate) fn get(&mut self, key: &str, version: u64) -> Option<Arc<[NodeId]>> {
        let hit = self
            .entries
            .get(&(key.to_owned(), version))
            .map(Arc::clone);
        if hit.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        hit
    }

    pub(crate) fn insert(&mut self, key: String, version: u64, ids: Arc<[NodeId]>) {
        if let Some(((old_key, old_version), _)) = self.entries.push((key.clone(), version), ids) {
            // `push` reports both same-key replacement and LRU eviction;
            // only the latter counts as an eviction.
            if old_key != key || old_version != version {
                self.stats.evictions += 1;
            }
        }
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.stats
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Arc<[NodeId]> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn version_mismatch_is_a_miss() {
        let mut cache = FilterCache::new(4);
        cache.insert("p".into(), 1, ids(&["a"]));
        assert!(cache.get("p", 1).is_some());
        assert!(cache.get("p", 2).is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn capacity_bound_evicts_oldest() {
        let mut cache = FilterCache::new(2);
        cache.insert("a".into(), 1, ids(&[]));
        cache.insert("b".into(), 1, ids(&[]));
        cache.insert("c".into(), 1, ids(&[]));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.get("a", 1).is_none());
    }

    #[test]
    fn same_key_replacement_is_not_an_eviction() {
        let mut cache = FilterCache::new(2);
        cache.insert("a".into(), 1, ids(&[]));
        cache.insert("a".into(), 1, ids(&["x"]));
        assert_eq!(cache.stats().evictions, 0);
    }
}

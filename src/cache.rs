//! URL-seen tracking, partitioned by category. A single mutex around a pair
//! of hash sets is sufficient — cache operations are not on any stage's hot
//! path relative to the network I/O they gate.

use std::collections::HashSet;
use std::sync::Mutex;

/// Which purpose a cached URL key was recorded for. `Processed` dedupes
/// outgoing requests (seed dictionary, redirects, backfeed); `Recursion`
/// dedupes directory-expansion targets so the same directory is never
/// recursed into twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    Processed,
    Recursion,
}

#[derive(Default)]
struct CacheSets {
    processed: HashSet<String>,
    recursion: HashSet<String>,
}

/// A set of URL keys partitioned by category. `check_cache` atomically tests
/// membership and optionally inserts, returning whether the key was already
/// present. Keys are never removed within a run.
pub struct HttpCache {
    sets: Mutex<CacheSets>,
}

impl HttpCache {
    pub fn new() -> Self {
        Self {
            sets: Mutex::new(CacheSets::default()),
        }
    }

    /// Returns `true` if `key` was already present in `category`. When
    /// `update` is true and the key was absent, it is inserted as part of
    /// the same critical section.
    pub fn check_cache(&self, key: &str, category: CacheCategory, update: bool) -> bool {
        let mut sets = self.sets.lock().unwrap();
        let set = match category {
            CacheCategory::Processed => &mut sets.processed,
            CacheCategory::Recursion => &mut sets.recursion,
        };
        let present = set.contains(key);
        if update && !present {
            set.insert(key.to_string());
        }
        present
    }

    /// Convenience for the common case: check-and-insert against the
    /// `Processed` category, as used by the seed stage's dictionary loop.
    pub fn check_processed(&self, key: &str) -> bool {
        self.check_cache(key, CacheCategory::Processed, true)
    }
}

impl Default for HttpCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_check_is_false_then_true() {
        let cache = HttpCache::new();
        assert!(!cache.check_cache("http://h/x", CacheCategory::Processed, true));
        assert!(cache.check_cache("http://h/x", CacheCategory::Processed, true));
        assert!(cache.check_cache("http://h/x", CacheCategory::Processed, true));
    }

    #[test]
    fn categories_are_independent() {
        let cache = HttpCache::new();
        assert!(!cache.check_cache("http://h/x", CacheCategory::Processed, true));
        assert!(!cache.check_cache("http://h/x", CacheCategory::Recursion, true));
    }

    #[test]
    fn read_only_check_does_not_insert() {
        let cache = HttpCache::new();
        assert!(!cache.check_cache("http://h/x", CacheCategory::Processed, false));
        assert!(!cache.check_cache("http://h/x", CacheCategory::Processed, false));
    }
}

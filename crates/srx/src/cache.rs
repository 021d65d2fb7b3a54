//! 🗃️ The enabled-state cache: "is indexing on for project 7?" asked ten thousand times a minute.
//!
//! This used to be ambient global state. Now it's a handle you pass around, like a
//! grown-up dependency. Entries are keyed by a type tag (`"project"`, `"namespace"`)
//! and a database id. Invalidation is explicit: drop a whole type, or one record.

use dashmap::DashMap;
use tracing::trace;

/// 🗃️ Memoized booleans, keyed by `(type tag, id)`.
#[derive(Debug, Default)]
pub struct EnabledCache {
    entries: DashMap<(String, u64), bool>,
}

impl EnabledCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🎯 Return the cached answer, or compute it once and remember it.
    ///
    /// `compute` runs without any shard lock held, so it may call back into the cache.
    pub fn fetch(&self, record_type: &str, id: u64, compute: impl FnOnce() -> bool) -> bool {
        if let Some(hit) = self.entries.get(&(record_type.to_string(), id)) {
            return *hit;
        }
        let computed = compute();
        trace!(record_type, id, computed, "🗃️ enabled-state cache miss");
        self.entries.insert((record_type.to_string(), id), computed);
        computed
    }

    /// 🧹 Forget everything about one type. Settings changed, trust nothing.
    pub fn delete(&self, record_type: &str) {
        self.entries.retain(|(cached_type, _), _| cached_type != record_type);
    }

    /// 🧹 Forget one record.
    pub fn delete_record(&self, record_type: &str, id: u64) {
        self.entries.remove(&(record_type.to_string(), id));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn the_one_where_compute_runs_exactly_once() {
        let cache = EnabledCache::new();
        let calls = Cell::new(0);
        for _ in 0..3 {
            let enabled = cache.fetch("project", 7, || {
                calls.set(calls.get() + 1);
                true
            });
            assert!(enabled);
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn the_one_where_invalidation_is_surgical_or_total() {
        let cache = EnabledCache::new();
        cache.fetch("project", 1, || true);
        cache.fetch("project", 2, || false);
        cache.fetch("namespace", 1, || true);

        cache.delete_record("project", 2);
        assert_eq!(cache.len(), 2);
        // 🔄 recomputed after invalidation
        assert!(cache.fetch("project", 2, || true));

        cache.delete("project");
        assert_eq!(cache.len(), 1, "only the namespace entry survives");
    }
}

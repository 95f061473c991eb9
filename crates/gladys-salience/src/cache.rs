//! In-memory heuristic cache.
//!
//! LRU keyed by heuristic id with optional TTL expiry and hit/miss
//! accounting. The cache holds copies of stored heuristics; it is warmed
//! by storage matches and reconciled by change notifications.

use std::num::NonZeroUsize;
use std::time::Duration;

use gladys_core::similarity::cosine_similarity;
use gladys_core::Heuristic;
use lru::LruCache;
use tracing::debug;

/// One cached heuristic with bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub heuristic: Heuristic,
    pub cached_at_ms: i64,
    pub last_hit_ms: Option<i64>,
    pub hit_count: u64,
}

/// Counters reported by `GetCacheStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub capacity: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

/// A candidate match from the cache.
#[derive(Debug, Clone)]
pub struct CacheMatch {
    pub heuristic: Heuristic,
    pub similarity: f64,
}

/// LRU/TTL cache over learned heuristics.
pub struct HeuristicCache {
    entries: LruCache<String, CacheEntry>,
    ttl: Option<Duration>,
    hits: u64,
    misses: u64,
    evictions: u64,
    invalidations: u64,
}

impl HeuristicCache {
    /// Cache with the given capacity and optional TTL.
    #[must_use]
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
            hits: 0,
            misses: 0,
            evictions: 0,
            invalidations: 0,
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now_ms: i64) -> bool {
        match self.ttl {
            Some(ttl) => now_ms.saturating_sub(entry.cached_at_ms) as u128 > ttl.as_millis(),
            None => false,
        }
    }

    /// Insert or refresh a heuristic. Eviction of the LRU entry is the
    /// cache's problem, not the caller's.
    pub fn insert(&mut self, heuristic: Heuristic) {
        let id = heuristic.id.clone();
        let entry = CacheEntry {
            heuristic,
            cached_at_ms: gladys_core::now_ms(),
            last_hit_ms: None,
            hit_count: 0,
        };
        if self.entries.len() == self.entries.cap().get() && !self.entries.contains(&id) {
            self.evictions += 1;
        }
        self.entries.put(id, entry);
    }

    /// Remove one heuristic. Stale invalidations for ids never cached are
    /// tolerated.
    pub fn evict(&mut self, heuristic_id: &str) -> bool {
        let existed = self.entries.pop(heuristic_id).is_some();
        if existed {
            self.invalidations += 1;
        }
        existed
    }

    /// Drop everything. Returns how many entries went.
    pub fn flush(&mut self) -> u64 {
        let count = self.entries.len() as u64;
        self.entries.clear();
        self.evictions += count;
        count
    }

    /// Scan for candidates matching the event embedding.
    ///
    /// Keeps entries clearing `max(global_min, heuristic threshold)` on
    /// similarity and `min_confidence` on confidence, with an exact
    /// source match when a source is given. TTL-expired entries are
    /// dropped during the scan. Does not touch recency; call
    /// [`Self::touch`] for the winning id.
    pub fn match_event(
        &mut self,
        embedding: &[f32],
        source: Option<&str>,
        global_min_similarity: f64,
        min_confidence: f64,
    ) -> Vec<CacheMatch> {
        let now_ms = gladys_core::now_ms();
        let mut expired: Vec<String> = Vec::new();
        let mut matches = Vec::new();

        for (id, entry) in self.entries.iter() {
            if self.is_expired(entry, now_ms) {
                expired.push(id.clone());
                continue;
            }
            let h = &entry.heuristic;
            if h.confidence < min_confidence || h.condition_embedding.is_empty() {
                continue;
            }
            if let Some(wanted) = source {
                if h.source.as_deref() != Some(wanted) {
                    continue;
                }
            }
            let similarity = cosine_similarity(&h.condition_embedding, embedding);
            if similarity >= global_min_similarity.max(h.similarity_threshold) {
                matches.push(CacheMatch {
                    heuristic: h.clone(),
                    similarity,
                });
            }
        }

        for id in expired {
            self.entries.pop(&id);
            self.evictions += 1;
        }

        if matches.is_empty() {
            self.misses += 1;
        } else {
            self.hits += 1;
        }
        matches
    }

    /// Mark a cache hit on the entry: bumps recency (the LRU key),
    /// hit count, and the heuristic's `last_accessed`.
    pub fn touch(&mut self, heuristic_id: &str) {
        let now_ms = gladys_core::now_ms();
        if let Some(entry) = self.entries.get_mut(heuristic_id) {
            entry.hit_count += 1;
            entry.last_hit_ms = Some(now_ms);
            entry.heuristic.last_accessed_ms = Some(now_ms);
            debug!(heuristic_id, hit_count = entry.hit_count, "cache hit");
        }
    }

    /// Whether the id is currently cached (ignoring TTL).
    #[must_use]
    pub fn contains(&self, heuristic_id: &str) -> bool {
        self.entries.contains(heuristic_id)
    }

    /// Most-recently-used entries, up to `limit`.
    #[must_use]
    pub fn list(&self, limit: usize) -> Vec<CacheEntry> {
        self.entries
            .iter()
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len() as u64,
            capacity: self.entries.cap().get() as u64,
            evictions: self.evictions,
            invalidations: self.invalidations,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)]
#[cfg(test)]
mod tests {
    use super::*;
    use gladys_core::heuristic::{HeuristicAction, HeuristicCondition};

    fn heuristic(text: &str, source: Option<&str>, embedding: Vec<f32>) -> Heuristic {
        let mut h = Heuristic::learned(
            text,
            HeuristicCondition {
                text: text.to_string(),
                source: source.map(str::to_string),
            },
            HeuristicAction {
                message: "act".to_string(),
                extra: None,
            },
        );
        h.condition_embedding = embedding;
        h
    }

    #[test]
    fn match_respects_thresholds_and_source() {
        let mut cache = HeuristicCache::new(10, None);
        cache.insert(heuristic("lava", Some("minecraft"), vec![1.0, 0.0]));
        cache.insert(heuristic("mail", Some("gmail"), vec![1.0, 0.0]));
        cache.insert(heuristic("unscoped", None, vec![1.0, 0.0]));

        let matches = cache.match_event(&[1.0, 0.0], Some("minecraft"), 0.6, 0.4);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].heuristic.condition.text, "lava");

        // Domain isolation: the gaming heuristic must not match finance.
        let matches = cache.match_event(&[1.0, 0.0], Some("finance"), 0.6, 0.4);
        assert!(matches.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn per_heuristic_threshold_can_raise_the_floor() {
        let mut cache = HeuristicCache::new(10, None);
        let mut strict = heuristic("strict", None, vec![1.0, 0.2]);
        strict.similarity_threshold = 0.999;
        cache.insert(strict);

        // Similar but not near-identical: blocked by the entry threshold
        // even though the global floor would admit it.
        let matches = cache.match_event(&[1.0, 0.0], None, 0.6, 0.0);
        assert!(matches.is_empty());
    }

    #[test]
    fn low_confidence_entries_do_not_match() {
        let mut cache = HeuristicCache::new(10, None);
        let mut shaky = heuristic("shaky", None, vec![1.0]);
        shaky.alpha = 1.0;
        shaky.beta = 3.0;
        shaky.confidence = 0.25;
        cache.insert(shaky);

        assert!(cache.match_event(&[1.0], None, 0.6, 0.5).is_empty());
    }

    #[test]
    fn lru_evicts_least_recently_touched() {
        let mut cache = HeuristicCache::new(2, None);
        let a = heuristic("a", None, vec![1.0, 0.0]);
        let b = heuristic("b", None, vec![0.0, 1.0]);
        let a_id = a.id.clone();
        let b_id = b.id.clone();
        cache.insert(a);
        cache.insert(b);

        // Touch `a` so `b` becomes the LRU entry.
        cache.touch(&a_id);
        cache.insert(heuristic("c", None, vec![1.0, 1.0]));

        assert!(cache.contains(&a_id));
        assert!(!cache.contains(&b_id));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn ttl_expiry_drops_entries_during_scan() {
        let mut cache = HeuristicCache::new(10, Some(Duration::from_millis(0)));
        cache.insert(heuristic("stale", None, vec![1.0]));
        std::thread::sleep(Duration::from_millis(5));

        let matches = cache.match_event(&[1.0], None, 0.0, 0.0);
        assert!(matches.is_empty());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn touch_updates_hit_bookkeeping() {
        let mut cache = HeuristicCache::new(10, None);
        let h = heuristic("rule", None, vec![1.0]);
        let id = h.id.clone();
        cache.insert(h);

        cache.touch(&id);
        cache.touch(&id);
        let listed = cache.list(10);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].hit_count, 2);
        assert!(listed[0].last_hit_ms.is_some());
        assert!(listed[0].heuristic.last_accessed_ms.is_some());
    }

    #[test]
    fn stale_invalidations_are_tolerated() {
        let mut cache = HeuristicCache::new(10, None);
        assert!(!cache.evict("never-cached"));
        assert_eq!(cache.stats().invalidations, 0);

        let h = heuristic("rule", None, vec![1.0]);
        let id = h.id.clone();
        cache.insert(h);
        assert!(cache.evict(&id));
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn flush_empties_and_counts() {
        let mut cache = HeuristicCache::new(10, None);
        cache.insert(heuristic("one", None, vec![1.0]));
        cache.insert(heuristic("two", None, vec![1.0]));
        assert_eq!(cache.flush(), 2);
        assert_eq!(cache.stats().entries, 0);
    }
}

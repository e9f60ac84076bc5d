use crate::cache_entry::CacheEntry;
use crate::config::LocalCacheConfig;
use crate::contract::{Cache, FetchFuture, ScriptValue};
use crate::error::{CacheError, Result};
use crate::sketch::FrequencySketch;
use crate::stampede::StampedeGuard;
use crate::stats::{CacheStats, StatsSnapshot};
use crate::EvictionPolicy;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TIER: &str = "local";

/// Resident keys examined when choosing an eviction victim.
const EVICTION_SAMPLE: usize = 5;

/// A process-local, cost-bounded, TTL-aware cache (the L1 tier).
///
/// Every key costs 1 against `max_keys`; the table never holds more than
/// `max_keys` entries. Once full, a victim is picked from a small random
/// sample of resident keys according to the [`EvictionPolicy`], so the
/// eviction order is approximate and not deterministic. Expired entries are
/// never returned: they are dropped lazily on access and preferentially
/// reclaimed when room is needed.
///
/// Only the key/value subset of the [`Cache`] contract is meaningful here;
/// counters, lists, scripts and sets fail with [`CacheError::Unsupported`].
///
/// `LocalCache` is a cheap handle: clones share the same table.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tiercache_core::{LocalCache, LocalCacheConfig};
///
/// let cache = LocalCache::new(LocalCacheConfig::with_max_keys(100));
/// assert!(cache.insert("user:42", "alice".to_string(), Duration::from_secs(5)));
/// assert_eq!(cache.lookup("user:42").as_deref(), Some("alice"));
///
/// cache.remove("user:42");
/// assert!(cache.lookup("user:42").is_none());
/// ```
#[derive(Clone)]
pub struct LocalCache {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    table: Mutex<Table>,
    max_keys: usize,
    policy: EvictionPolicy,
    stats: CacheStats,
    guard: StampedeGuard,
    closed: AtomicBool,
}

struct Table {
    entries: HashMap<String, Slot>,
    /// Dense list of resident keys, for O(1) random sampling.
    keys: Vec<String>,
    sketch: FrequencySketch,
}

struct Slot {
    entry: CacheEntry<String>,
    index: usize,
}

impl Table {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<String>> {
        let slot = self.entries.remove(key)?;
        self.keys.swap_remove(slot.index);
        if let Some(moved) = self.keys.get(slot.index) {
            if let Some(moved_slot) = self.entries.get_mut(moved) {
                moved_slot.index = slot.index;
            }
        }
        Some(slot.entry)
    }

    fn push(&mut self, key: String, entry: CacheEntry<String>) {
        let index = self.keys.len();
        self.keys.push(key.clone());
        self.entries.insert(key, Slot { entry, index });
    }

    /// Random, possibly repeating, sample of resident keys.
    fn sample(&self) -> Vec<String> {
        let len = self.keys.len();
        (0..EVICTION_SAMPLE.min(len))
            .map(|_| self.keys[fastrand::usize(..len)].clone())
            .collect()
    }
}

impl LocalCache {
    /// Creates an empty cache with the given budget and policy.
    pub fn new(config: LocalCacheConfig) -> Self {
        let max_keys = config.max_keys.max(1);
        let counters = max_keys.saturating_mul(config.counters_per_key.max(1));
        Self {
            inner: Arc::new(LocalInner {
                table: Mutex::new(Table {
                    entries: HashMap::new(),
                    keys: Vec::new(),
                    sketch: FrequencySketch::new(counters),
                }),
                max_keys: usize::try_from(max_keys).unwrap_or(usize::MAX),
                policy: config.policy,
                stats: CacheStats::new(),
                guard: StampedeGuard::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Looks up a live entry, recording a hit or a miss.
    pub fn lookup(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut table = self.inner.table.lock();

        if self.inner.policy.uses_admission() {
            table.sketch.increment(key);
        }

        let probe = table.entries.get_mut(key).map(|slot| {
            if slot.entry.is_expired_at(now) {
                None
            } else {
                slot.entry.touch();
                Some(slot.entry.value.clone())
            }
        });

        match probe {
            Some(Some(value)) => {
                drop(table);
                self.inner.stats.record_hit();
                return Some(value);
            }
            Some(None) => {
                table.remove(key);
                self.inner.stats.record_expired();
            }
            None => {}
        }
        drop(table);

        self.inner.stats.record_miss();
        None
    }

    /// Whether a live entry exists, without touching statistics or recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .table
            .lock()
            .entries
            .get(key)
            .is_some_and(|slot| !slot.entry.is_expired_at(now))
    }

    /// Inserts or replaces `key`, expiring after `ttl` (`Duration::ZERO` = never).
    ///
    /// Returns `false` when the admission policy refused a new key because
    /// the cache is full of more popular entries. Replacing an existing key
    /// is always accepted.
    pub fn insert(&self, key: &str, value: String, ttl: Duration) -> bool {
        let mut table = self.inner.table.lock();

        if let Some(slot) = table.entries.get_mut(key) {
            let frequency = slot.entry.frequency;
            slot.entry = CacheEntry::new(value, ttl);
            slot.entry.frequency = frequency;
            self.inner.stats.record_updated();
            return true;
        }

        if table.keys.len() >= self.inner.max_keys && !self.make_room(&mut table, key) {
            drop(table);
            self.inner.stats.record_rejected();
            tracing::trace!(key = %key, "local cache rejected new key");
            return false;
        }

        table.push(key.to_owned(), CacheEntry::new(value, ttl));
        drop(table);
        self.inner.stats.record_added();
        true
    }

    /// Frees one slot for `incoming`. Returns `false` if admission refused it.
    fn make_room(&self, table: &mut Table, incoming: &str) -> bool {
        let now = Instant::now();
        let sample = table.sample();

        // Expired entries are free to reclaim
        let mut reclaimed = false;
        for key in &sample {
            let is_expired = table
                .entries
                .get(key)
                .is_some_and(|slot| slot.entry.is_expired_at(now));
            if is_expired && table.remove(key).is_some() {
                self.inner.stats.record_expired();
                reclaimed = true;
            }
        }
        if reclaimed {
            return true;
        }

        let victim = match self.inner.policy {
            EvictionPolicy::Random => sample.into_iter().next(),
            EvictionPolicy::TinyLFU => sample
                .into_iter()
                .filter_map(|key| {
                    let slot = table.entries.get(&key)?;
                    let rank = (
                        table.sketch.estimate(&key),
                        slot.entry.frequency,
                        slot.entry.last_access,
                    );
                    Some((rank, key))
                })
                .min_by(|a, b| a.0.cmp(&b.0))
                .map(|(_, key)| key),
        };

        let Some(victim) = victim else {
            return true;
        };

        if self.inner.policy.uses_admission()
            && table.sketch.estimate(incoming) < table.sketch.estimate(&victim)
        {
            return false;
        }

        table.remove(&victim);
        self.inner.stats.record_evicted();
        true
    }

    /// Removes `key`. Returns whether it was resident.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.table.lock().remove(key).is_some()
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut table = self.inner.table.lock();
        let expired: Vec<String> = table
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            table.remove(key);
            self.inner.stats.record_expired();
        }
        expired.len()
    }

    /// Removes every entry and forgets key popularity.
    pub fn clear(&self) {
        let mut table = self.inner.table.lock();
        table.entries.clear();
        table.keys.clear();
        table.sketch.clear();
    }

    /// Resident entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.inner.table.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_keys(&self) -> usize {
        self.inner.max_keys
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.inner.policy
    }

    /// Live counters of this tier.
    pub fn counters(&self) -> &CacheStats {
        &self.inner.stats
    }

    /// The stampede guard used by [`Cache::get_or_set`] on this tier.
    pub fn guard(&self) -> &StampedeGuard {
        &self.inner.guard
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Cache for LocalCache {
    async fn get(&self, key: &str) -> Result<String> {
        self.ensure_open()?;
        self.lookup(key).ok_or(CacheError::NotFound)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.contains(key))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.ensure_open()?;
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        self.remove(key);
        Ok(())
    }

    async fn incr(&self, _key: &str) -> Result<i64> {
        Err(CacheError::unsupported("incr", TIER))
    }

    async fn rpush(&self, _key: &str, _values: &[String]) -> Result<()> {
        Err(CacheError::unsupported("rpush", TIER))
    }

    async fn blpop(&self, _timeout: Duration, _keys: &[String]) -> Result<Vec<String>> {
        Err(CacheError::unsupported("blpop", TIER))
    }

    async fn ltrim(&self, _key: &str, _start: i64, _stop: i64) -> Result<()> {
        Err(CacheError::unsupported("ltrim", TIER))
    }

    async fn eval(&self, _script: &str, _keys: &[String], _args: &[String]) -> Result<ScriptValue> {
        Err(CacheError::unsupported("eval", TIER))
    }

    async fn sadd(&self, _key: &str, _members: &[String]) -> Result<()> {
        Err(CacheError::unsupported("sadd", TIER))
    }

    async fn sismember(&self, _key: &str, _member: &str) -> Result<bool> {
        Err(CacheError::unsupported("sismember", TIER))
    }

    async fn get_or_set(&self, key: &str, ttl: Duration, fetch: FetchFuture) -> Result<String> {
        self.ensure_open()?;
        if let Some(value) = self.lookup(key) {
            return Ok(value);
        }

        let cache = self.clone();
        let owned_key = key.to_owned();
        self.inner
            .guard
            .run(key, async move {
                let value = fetch.await.map_err(CacheError::FetchFailed)?;
                cache.insert(&owned_key, value.clone(), ttl);
                Ok(value)
            })
            .await
    }

    async fn stats(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::new();
        snapshot.extend_from_counters(&self.inner.stats);
        snapshot.insert("items", self.len());
        snapshot.insert("max_keys", self.inner.max_keys);
        snapshot.insert("in_flight", self.inner.guard.in_flight());
        snapshot.insert("coalesced", self.inner.guard.coalesced());
        snapshot
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        self.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheExt;

    fn cache(max_keys: u64) -> LocalCache {
        LocalCache::new(LocalCacheConfig::with_max_keys(max_keys))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_is_unobservable() {
        let cache = cache(10);
        cache.insert("k", "v".into(), Duration::from_secs(5));
        assert_eq!(cache.lookup("k").as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.lookup("k").is_none());
        assert!(!cache.contains("k"));
        assert_eq!(cache.counters().keys_expired(), 1);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_never_exceeds_budget() {
        for policy in [EvictionPolicy::TinyLFU, EvictionPolicy::Random] {
            let cache = LocalCache::new(LocalCacheConfig::with_max_keys(32).policy(policy));
            for i in 0..1_000 {
                cache.insert(&format!("k{i}"), i.to_string(), Duration::ZERO);
                assert!(cache.len() <= 32);
            }
            assert_eq!(cache.len(), 32);
        }
    }

    #[test]
    fn test_update_does_not_consume_budget() {
        let cache = cache(2);
        assert!(cache.insert("a", "1".into(), Duration::ZERO));
        assert!(cache.insert("b", "2".into(), Duration::ZERO));
        assert!(cache.insert("a", "3".into(), Duration::ZERO));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("a").as_deref(), Some("3"));
        assert_eq!(cache.counters().keys_updated(), 1);
    }

    #[test]
    fn test_tinylfu_keeps_hot_keys() {
        let cache = cache(4);
        for key in ["a", "b", "c", "d"] {
            cache.insert(key, key.to_string(), Duration::ZERO);
            for _ in 0..8 {
                cache.lookup(key);
            }
        }

        // Cold newcomers lose against hot residents
        for i in 0..20 {
            cache.insert(&format!("cold{i}"), "x".into(), Duration::ZERO);
        }
        for key in ["a", "b", "c", "d"] {
            assert!(cache.contains(key), "{key} should have survived");
        }
        assert!(cache.counters().keys_rejected() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_reclaimed_first() {
        let cache = cache(1);
        cache.insert("old", "1".into(), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(cache.insert("new", "2".into(), Duration::ZERO));
        assert_eq!(cache.counters().keys_expired(), 1);
        assert_eq!(cache.counters().keys_evicted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = cache(10);
        cache.insert("short", "1".into(), Duration::from_secs(1));
        cache.insert("long", "2".into(), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_keeps_index_consistent() {
        let cache = cache(10);
        for key in ["a", "b", "c"] {
            cache.insert(key, key.into(), Duration::ZERO);
        }
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.lookup("c").as_deref(), Some("c"));
        assert!(cache.remove("c"));
        assert_eq!(cache.lookup("b").as_deref(), Some("b"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_operations() {
        let cache = cache(10);
        assert!(matches!(
            cache.incr("n").await,
            Err(CacheError::Unsupported { operation: "incr", tier: "local" })
        ));
        assert!(matches!(
            cache.sismember("s", "m").await,
            Err(CacheError::Unsupported { .. })
        ));
        assert!(matches!(
            cache.eval("return 1", &[], &[]).await,
            Err(CacheError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_or_set_failure_caches_nothing() {
        let cache = cache(10);
        let err = cache
            .get_or_set_with("k", Duration::from_secs(60), || async {
                Err::<String, _>("upstream down")
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upstream down");
        assert!(!cache.contains("k"));
    }

    #[tokio::test]
    async fn test_closed_cache_rejects_operations() {
        let cache = cache(10);
        cache.set("k", "v".into(), Duration::ZERO).await.unwrap();
        cache.close().await.unwrap();
        assert!(matches!(cache.get("k").await, Err(CacheError::Closed)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let cache = cache(10);
        cache.set("k", "v".into(), Duration::ZERO).await.unwrap();
        cache.get("k").await.unwrap();
        assert!(cache.get("missing").await.unwrap_err().is_not_found());

        let stats = cache.stats().await;
        assert_eq!(stats.int("hits"), Some(1));
        assert_eq!(stats.int("misses"), Some(1));
        assert_eq!(stats.int("items"), Some(1));
        assert_eq!(stats.int("max_keys"), Some(10));
        assert_eq!(stats.int("keys_added"), Some(1));
    }
}

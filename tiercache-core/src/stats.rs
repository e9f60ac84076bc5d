use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one cache tier.
///
/// All operations use atomic counters with `Relaxed` ordering: each counter is
/// individually consistent, the set as a whole is a best-effort view.
///
/// # Examples
///
/// ```
/// use tiercache_core::CacheStats;
///
/// let stats = CacheStats::new();
///
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_miss();
///
/// assert_eq!(stats.hits(), 2);
/// assert_eq!(stats.misses(), 1);
/// assert_eq!(stats.total_accesses(), 3);
/// assert!((stats.hit_rate() - 0.6666).abs() < 0.001);
/// ```
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    keys_added: AtomicU64,
    keys_updated: AtomicU64,
    keys_evicted: AtomicU64,
    keys_rejected: AtomicU64,
    keys_expired: AtomicU64,
    timeouts: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $read:ident) => {
        #[inline]
        pub fn $record(&self) {
            self.$read.fetch_add(1, Ordering::Relaxed);
        }

        #[inline]
        pub fn $read(&self) -> u64 {
            self.$read.load(Ordering::Relaxed)
        }
    };
}

impl CacheStats {
    /// Creates a new `CacheStats` instance with zero counters.
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_hit, hits);
    counter!(record_miss, misses);
    counter!(record_added, keys_added);
    counter!(record_updated, keys_updated);
    counter!(record_evicted, keys_evicted);
    counter!(record_rejected, keys_rejected);
    counter!(record_expired, keys_expired);
    counter!(record_timeout, timeouts);

    /// Returns the total number of lookups (hits + misses).
    #[inline]
    pub fn total_accesses(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Fraction of lookups that were hits, 0.0 when nothing was looked up.
    ///
    /// ```
    /// use tiercache_core::CacheStats;
    ///
    /// let stats = CacheStats::new();
    /// assert_eq!(stats.hit_rate(), 0.0);
    /// ```
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Fraction of lookups that were misses.
    #[inline]
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.keys_added,
            &self.keys_updated,
            &self.keys_evicted,
            &self.keys_rejected,
            &self.keys_expired,
            &self.timeouts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            keys_added: AtomicU64::new(self.keys_added()),
            keys_updated: AtomicU64::new(self.keys_updated()),
            keys_evicted: AtomicU64::new(self.keys_evicted()),
            keys_rejected: AtomicU64::new(self.keys_rejected()),
            keys_expired: AtomicU64::new(self.keys_expired()),
            timeouts: AtomicU64::new(self.timeouts()),
        }
    }
}

/// One value in a [`StatsSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Int(i64),
    Float(f64),
    Nested(StatsSnapshot),
}

impl StatValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StatValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            StatValue::Float(v) => Some(*v),
            StatValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&StatsSnapshot> {
        match self {
            StatValue::Nested(v) => Some(v),
            _ => None,
        }
    }
}

impl From<u64> for StatValue {
    fn from(v: u64) -> Self {
        StatValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for StatValue {
    fn from(v: usize) -> Self {
        StatValue::from(v as u64)
    }
}

impl From<i64> for StatValue {
    fn from(v: i64) -> Self {
        StatValue::Int(v)
    }
}

impl From<f64> for StatValue {
    fn from(v: f64) -> Self {
        StatValue::Float(v)
    }
}

impl From<StatsSnapshot> for StatValue {
    fn from(v: StatsSnapshot) -> Self {
        StatValue::Nested(v)
    }
}

/// A point-in-time mapping from metric name to value.
///
/// Produced on demand by [`Cache::stats`](crate::Cache::stats) and never a
/// live view; the hybrid tier nests one snapshot per tier name.
///
/// ```
/// use tiercache_core::StatsSnapshot;
///
/// let mut local = StatsSnapshot::new();
/// local.insert("hits", 3u64);
///
/// let mut hybrid = StatsSnapshot::new();
/// hybrid.insert("local", local);
///
/// assert_eq!(hybrid.get_path(&["local", "hits"]).and_then(|v| v.as_int()), Some(3));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StatsSnapshot(BTreeMap<String, StatValue>);

impl StatsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<StatValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&StatValue> {
        self.0.get(name)
    }

    /// Follows nested snapshots, e.g. `["local", "hits"]`.
    pub fn get_path(&self, path: &[&str]) -> Option<&StatValue> {
        let (last, parents) = path.split_last()?;
        let mut current = self;
        for name in parents {
            current = current.get(name)?.as_nested()?;
        }
        current.get(last)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(StatValue::as_int)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StatValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copies every counter of `stats` into this snapshot.
    pub fn extend_from_counters(&mut self, stats: &CacheStats) {
        self.insert("hits", stats.hits());
        self.insert("misses", stats.misses());
        self.insert("hit_ratio", stats.hit_rate());
        self.insert("keys_added", stats.keys_added());
        self.insert("keys_updated", stats.keys_updated());
        self.insert("keys_evicted", stats.keys_evicted());
        self.insert("keys_rejected", stats.keys_rejected());
        self.insert("keys_expired", stats.keys_expired());
    }
}

use std::time::Duration;
use tokio::time::Instant;

/// A value held by one tier together with its expiry deadline.
///
/// Each tier owns its own copy of an entry; entries are never shared between
/// tiers. Time is read through [`tokio::time::Instant`] so a paused test
/// clock drives expiry exactly like wall-clock time does in production.
///
/// # Fields
///
/// * `value` - The cached text
/// * `expires_at` - Deadline after which the entry is unobservable (`None` = never)
/// * `frequency` - Hits served since insertion, used by eviction
/// * `last_access` - When the entry was last read or written
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tiercache_core::CacheEntry;
///
/// let entry = CacheEntry::new("data".to_string(), Duration::from_secs(60));
/// assert_eq!(entry.value, "data");
/// assert_eq!(entry.frequency, 0);
/// assert!(!entry.is_expired());
///
/// // A zero TTL never expires
/// let forever = CacheEntry::new("data".to_string(), Duration::ZERO);
/// assert!(forever.expires_at.is_none());
/// ```
#[derive(Clone, Debug)]
pub struct CacheEntry<R> {
    pub value: R,
    pub expires_at: Option<Instant>,
    pub frequency: u64,
    pub last_access: Instant,
}

impl<R> CacheEntry<R> {
    /// Creates a new entry expiring `ttl` from now. `Duration::ZERO` means no expiry.
    pub fn new(value: R, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: deadline(now, ttl),
            frequency: 0,
            last_access: now,
        }
    }

    /// Returns true once the entry's deadline has been reached.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Same as [`is_expired`](Self::is_expired) against a caller-supplied clock reading.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    /// Time left before expiry, `None` if the entry never expires.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Records a read: bumps the frequency counter and the access time.
    ///
    /// ```
    /// use std::time::Duration;
    /// use tiercache_core::CacheEntry;
    ///
    /// let mut entry = CacheEntry::new(42, Duration::ZERO);
    /// entry.touch();
    /// entry.touch();
    /// assert_eq!(entry.frequency, 2);
    /// ```
    pub fn touch(&mut self) {
        self.frequency = self.frequency.saturating_add(1);
        self.last_access = Instant::now();
    }
}

pub(crate) fn deadline(now: Instant, ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(now + ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_new_entry_not_expired() {
        let entry = CacheEntry::new(42, Duration::from_secs(10));
        assert_eq!(entry.value, 42);
        assert!(!entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expiration() {
        let entry = CacheEntry::new("data", Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!entry.is_expired());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(entry.is_expired());
        assert_eq!(entry.remaining_ttl(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_expires() {
        let entry = CacheEntry::new(100, Duration::ZERO);
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(!entry.is_expired());
        assert_eq!(entry.remaining_ttl(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_updates_access_time() {
        let mut entry = CacheEntry::new("v", Duration::ZERO);
        let created = entry.last_access;
        tokio::time::advance(Duration::from_secs(3)).await;
        entry.touch();
        assert_eq!(entry.frequency, 1);
        assert_eq!(entry.last_access - created, Duration::from_secs(3));
    }
}

use serde::Deserialize;

/// Represents the policy used by [`LocalCache`](crate::LocalCache) when its key
/// budget is exhausted.
///
/// Both policies are approximate: victims are chosen from a small random
/// sample of resident keys rather than from a strictly ordered list, so the
/// eviction order is not deterministic.
///
/// # Variants
///
/// * `TinyLFU` - **Sampled LFU with frequency-sketch admission** (default)
///   - Every lookup feeds a count-min sketch of key popularity
///   - When full, the least frequently (then least recently) used key of a
///     random sample is the eviction candidate
///   - A newcomer whose estimated frequency is below the candidate's is
///     rejected instead of displacing it
///   - Keeps frequently and recently used items under a fixed cost budget
///
/// * `Random` - **Random replacement**
///   - Always admits; evicts a uniformly random resident key
///   - O(1) with minimal bookkeeping
///
/// # Examples
///
/// ```
/// use tiercache_core::EvictionPolicy;
///
/// let default_policy = EvictionPolicy::default();
/// assert_eq!(default_policy, EvictionPolicy::TinyLFU);
///
/// let policy: EvictionPolicy = "random".into();
/// assert_eq!(policy, EvictionPolicy::Random);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum EvictionPolicy {
    TinyLFU,
    Random,
}

impl EvictionPolicy {
    /// Returns the default eviction policy (TinyLFU).
    pub const fn default() -> Self {
        EvictionPolicy::TinyLFU
    }

    /// Whether the policy may refuse to admit a new key when the cache is full.
    pub fn uses_admission(&self) -> bool {
        matches!(self, EvictionPolicy::TinyLFU)
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::default()
    }
}

/// Converts a string slice to an `EvictionPolicy`.
///
/// The conversion is case-insensitive and defaults to TinyLFU for
/// unrecognized values.
///
/// - `"random"` → `EvictionPolicy::Random`
/// - `"tinylfu"`, `"lfu"` or anything else → `EvictionPolicy::TinyLFU`
impl From<&str> for EvictionPolicy {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "random" => EvictionPolicy::Random,
            _ => EvictionPolicy::TinyLFU,
        }
    }
}

impl From<String> for EvictionPolicy {
    fn from(s: String) -> Self {
        EvictionPolicy::from(s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!(EvictionPolicy::from("RANDOM"), EvictionPolicy::Random);
        assert_eq!(EvictionPolicy::from("TinyLfu"), EvictionPolicy::TinyLFU);
        assert_eq!(EvictionPolicy::from("lru"), EvictionPolicy::TinyLFU);
    }

    #[test]
    fn test_deserialize_from_string() {
        let policy: EvictionPolicy = serde_json::from_str("\"random\"").unwrap();
        assert_eq!(policy, EvictionPolicy::Random);
    }

    #[test]
    fn test_admission() {
        assert!(EvictionPolicy::TinyLFU.uses_admission());
        assert!(!EvictionPolicy::Random.uses_admission());
    }
}

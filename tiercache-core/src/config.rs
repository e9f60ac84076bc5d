//! Configuration shapes consumed by the tiers.
//!
//! Loading is left to the embedding application; these structs only fix the
//! shape and the defaults, so any serde format can populate them.

use crate::EvictionPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Broadcast channel carrying L1 invalidation notices.
pub const DEFAULT_INVALIDATION_CHANNEL: &str = "cache:l1:invalidate";

/// Local bounded cache (L1) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalCacheConfig {
    /// Maximum number of resident keys (each key costs 1)
    #[serde(default = "default_max_keys")]
    pub max_keys: u64,

    /// Eviction / admission policy once `max_keys` is reached
    #[serde(default)]
    pub policy: EvictionPolicy,

    /// Frequency-sketch counters per key of budget
    #[serde(default = "default_counters_per_key")]
    pub counters_per_key: u64,
}

fn default_max_keys() -> u64 {
    10_000
}

fn default_counters_per_key() -> u64 {
    10
}

impl LocalCacheConfig {
    pub fn with_max_keys(max_keys: u64) -> Self {
        Self {
            max_keys,
            ..Self::default()
        }
    }

    pub fn policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_keys: default_max_keys(),
            policy: EvictionPolicy::default(),
            counters_per_key: default_counters_per_key(),
        }
    }
}

/// Hybrid coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HybridConfig {
    /// TTL given to L1 copies populated from an L2 hit, in seconds
    #[serde(default = "default_l1_population_ttl_secs")]
    pub l1_population_ttl_secs: u64,

    /// Channel used for cross-process invalidation
    #[serde(default = "default_invalidation_channel")]
    pub invalidation_channel: String,

    /// How long `stop` waits for the listener loop to exit, in milliseconds
    #[serde(default = "default_listener_shutdown_timeout_ms")]
    pub listener_shutdown_timeout_ms: u64,
}

fn default_l1_population_ttl_secs() -> u64 {
    300
}

fn default_invalidation_channel() -> String {
    DEFAULT_INVALIDATION_CHANNEL.to_string()
}

fn default_listener_shutdown_timeout_ms() -> u64 {
    5_000
}

impl HybridConfig {
    pub fn l1_population_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_population_ttl_secs)
    }

    pub fn listener_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_shutdown_timeout_ms)
    }
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            l1_population_ttl_secs: default_l1_population_ttl_secs(),
            invalidation_channel: default_invalidation_channel(),
            listener_shutdown_timeout_ms: default_listener_shutdown_timeout_ms(),
        }
    }
}

//! # Tiercache Core
//!
//! Core traits and building blocks for the Tiercache multi-tier cache.
//!
//! A process-local bounded cache (L1) sits in front of a shared remote store
//! (L2). The [`HybridCache`] coordinator composes them behind one [`Cache`]
//! contract, an [`InvalidationListener`] keeps L1 copies in step across
//! processes, and a [`StampedeGuard`] collapses concurrent fills of one key
//! into a single upstream fetch.
//!
//! ## Features
//!
//! - **One Contract**: every tier implements [`Cache`]; unsupported operations fail loudly
//! - **Bounded L1**: key budget with TinyLFU admission or random eviction
//! - **TTL Support**: expired entries are never observable
//! - **Read-Through / Write-Through**: L2 authoritative, L1 best-effort
//! - **Cross-Process Invalidation**: publish a key, every listener drops its L1 copy
//! - **Stampede Protection**: one fetch per key per process
//! - **Statistics**: nested snapshots per tier
//!
//! ## Module Organization
//!
//! - [`cache_entry`] - Entry wrapper with optional expiry deadline
//! - [`eviction_policy`] - TinyLFU and random eviction strategies
//! - [`stampede`] - Per-key call coalescing
//! - [`invalidation`] - Invalidation publisher and listener
//! - [`hybrid`] - The L1 + L2 coordinator
//!
//! The Redis-backed L2 lives in the `tiercache-redis` crate; [`MemoryStore`]
//! is an in-process stand-in with the same contract.
//!
mod config;
mod contract;
mod error;
mod local_cache;
mod memory_store;
mod pubsub;
mod sketch;
mod stats;
mod tiered;

pub mod cache_entry;
pub mod eviction_policy;
pub mod hybrid;
pub mod invalidation;
pub mod stampede;

pub use cache_entry::CacheEntry;
pub use config::{HybridConfig, LocalCacheConfig, DEFAULT_INVALIDATION_CHANNEL};
pub use contract::{Cache, CacheExt, FetchFuture, ScriptValue};
pub use error::{CacheError, Result, SharedError};
pub use eviction_policy::EvictionPolicy;
pub use hybrid::HybridCache;
pub use invalidation::{
    publish_invalidation, publish_invalidation_multi, InvalidationListener, ListenerState,
};
pub use local_cache::LocalCache;
pub use memory_store::MemoryStore;
pub use pubsub::{PubSub, Subscription};
pub use stampede::StampedeGuard;
pub use stats::{CacheStats, StatValue, StatsSnapshot};
pub use tiered::TieredCache;

use serde::Deserialize;

/// Which tiers a cache is assembled from.
///
/// # Variants
///
/// * `Local` - L1 only, nothing leaves the process
/// * `Remote` - L2 only, every call is a round-trip
/// * `Hybrid` - L1 in front of L2 with cross-process invalidation
///
/// # Examples
///
/// ```
/// use tiercache_core::CacheMode;
///
/// assert_eq!(CacheMode::default(), CacheMode::Hybrid);
/// assert_eq!(CacheMode::from("remote"), CacheMode::Remote);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Local,
    Remote,
    #[default]
    Hybrid,
}

impl From<&str> for CacheMode {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "local" => CacheMode::Local,
            "remote" => CacheMode::Remote,
            _ => CacheMode::Hybrid,
        }
    }
}

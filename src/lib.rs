//! # Tiercache
//!
//! Multi-tier caching for async Rust services: a bounded in-process L1 in
//! front of a shared Redis L2, with cross-process L1 invalidation and
//! per-key stampede protection.
//!
//! ## Features
//!
//! - **One contract**: local, remote and hybrid caches all implement [`Cache`]
//! - **Read-through / write-through**: L2 is authoritative, L1 is best-effort
//! - **Bounded L1**: key budget with TinyLFU admission or random eviction
//! - **Invalidation**: publish a key, every process drops its L1 copy
//! - **Stampede protection**: concurrent misses on one key share one fetch
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tiercache::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tiercache::Result<()> {
//! // Any `Cache + PubSub` can be the shared tier; here an in-process store
//! let shared = Arc::new(MemoryStore::new());
//! let cache = tiercache::assemble(&TierCacheConfig::default(), shared).await?;
//!
//! let report = cache
//!     .get_or_set_with("report:2024", Duration::from_secs(60), || async {
//!         Ok::<_, std::io::Error>("R1".to_string())
//!     })
//!     .await?;
//! assert_eq!(report, "R1");
//!
//! cache.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! With the default `redis` feature, [`build_cache`] connects to Redis using
//! [`TierCacheConfig::redis`] and assembles the configured variant.
//!
//! ## Invalidation
//!
//! Writes do not broadcast on their own. After changing a key that other
//! processes may hold in L1, publish it:
//!
//! ```rust
//! # use std::time::Duration;
//! # use tiercache::prelude::*;
//! # async fn write(cache: &TieredCache, shared: &MemoryStore) -> tiercache::Result<()> {
//! cache.set("user:42", "{\"name\":\"a\"}".to_string(), Duration::from_secs(300)).await?;
//! publish_invalidation(shared, DEFAULT_INVALIDATION_CHANNEL, "user:42").await?;
//! # Ok(())
//! # }
//! ```

pub use tiercache_core::*;

#[cfg(feature = "redis")]
pub use tiercache_redis::{RedisCache, RedisOptions};

use serde::Deserialize;
use std::sync::Arc;

/// Everything needed to assemble a cache.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TierCacheConfig {
    pub mode: CacheMode,
    pub local: LocalCacheConfig,
    pub hybrid: HybridConfig,
    #[cfg(feature = "redis")]
    pub redis: RedisOptions,
}

/// Assembles the configured variant over an already connected shared tier.
///
/// In [`CacheMode::Hybrid`] the invalidation listener is started on `shared`
/// before this returns. `shared` is unused in [`CacheMode::Local`].
pub async fn assemble<S>(config: &TierCacheConfig, shared: Arc<S>) -> Result<TieredCache>
where
    S: Cache + PubSub + 'static,
{
    let cache = match config.mode {
        CacheMode::Local => TieredCache::LocalOnly(LocalCache::new(config.local.clone())),
        CacheMode::Remote => TieredCache::RemoteOnly(shared),
        CacheMode::Hybrid => {
            let hybrid = HybridCache::new(
                LocalCache::new(config.local.clone()),
                shared.clone(),
                config.hybrid.clone(),
            );
            hybrid.start_invalidator(shared).await?;
            TieredCache::Hybrid(hybrid)
        }
    };
    tracing::info!(mode = cache.variant(), "cache assembled");
    Ok(cache)
}

/// Connects to Redis (unless the mode is local) and assembles the variant.
#[cfg(feature = "redis")]
pub async fn build_cache(config: &TierCacheConfig) -> Result<TieredCache> {
    if config.mode == CacheMode::Local {
        return Ok(TieredCache::LocalOnly(LocalCache::new(config.local.clone())));
    }
    let redis = Arc::new(RedisCache::connect(config.redis.clone()).await?);
    assemble(config, redis).await
}

/// Commonly used types, for glob import.
pub mod prelude {
    pub use crate::{assemble, TierCacheConfig};
    pub use tiercache_core::{
        publish_invalidation, publish_invalidation_multi, Cache, CacheError, CacheExt, CacheMode,
        EvictionPolicy, HybridCache, HybridConfig, LocalCache, LocalCacheConfig, MemoryStore,
        PubSub, StatsSnapshot, TieredCache, DEFAULT_INVALIDATION_CHANNEL,
    };

    #[cfg(feature = "redis")]
    pub use crate::build_cache;
    #[cfg(feature = "redis")]
    pub use tiercache_redis::{RedisCache, RedisOptions};
}

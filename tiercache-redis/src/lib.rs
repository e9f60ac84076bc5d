//! # Tiercache Redis
//!
//! The shared remote tier (L2) of Tiercache, on Redis.
//!
//! [`RedisCache`] implements the [`Cache`](tiercache_core::Cache) contract on
//! a `deadpool-redis` connection pool and the
//! [`PubSub`](tiercache_core::PubSub) broadcast medium on a dedicated
//! subscriber connection, so one value serves both as a
//! [`HybridCache`](tiercache_core::HybridCache)'s L2 and as its invalidation
//! channel.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tiercache_core::{HybridCache, HybridConfig, LocalCache, LocalCacheConfig};
//! use tiercache_redis::{RedisCache, RedisOptions};
//!
//! # async fn run() -> tiercache_core::Result<()> {
//! let redis = Arc::new(RedisCache::connect(RedisOptions::default()).await?);
//! let cache = HybridCache::new(
//!     LocalCache::new(LocalCacheConfig::default()),
//!     redis.clone(),
//!     HybridConfig::default(),
//! );
//! cache.start_invalidator(redis).await?;
//! # Ok(())
//! # }
//! ```

mod options;
mod store;

pub use options::RedisOptions;
pub use store::RedisCache;

use crate::contract::{Cache, FetchFuture, ScriptValue};
use crate::error::Result;
use crate::hybrid::HybridCache;
use crate::local_cache::LocalCache;
use crate::stats::StatsSnapshot;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The cache variant chosen at construction time.
///
/// `Hybrid` composes the other two; every variant answers the same
/// [`Cache`] contract so callers never branch on the deployment shape.
#[derive(Clone)]
pub enum TieredCache {
    RemoteOnly(Arc<dyn Cache>),
    LocalOnly(LocalCache),
    Hybrid(HybridCache),
}

impl TieredCache {
    fn as_cache(&self) -> &dyn Cache {
        match self {
            TieredCache::RemoteOnly(remote) => remote.as_ref(),
            TieredCache::LocalOnly(local) => local,
            TieredCache::Hybrid(hybrid) => hybrid,
        }
    }

    pub fn variant(&self) -> &'static str {
        match self {
            TieredCache::RemoteOnly(_) => "remote",
            TieredCache::LocalOnly(_) => "local",
            TieredCache::Hybrid(_) => "hybrid",
        }
    }

    pub fn as_hybrid(&self) -> Option<&HybridCache> {
        match self {
            TieredCache::Hybrid(hybrid) => Some(hybrid),
            _ => None,
        }
    }
}

impl fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TieredCache").field(&self.variant()).finish()
    }
}

impl From<LocalCache> for TieredCache {
    fn from(local: LocalCache) -> Self {
        TieredCache::LocalOnly(local)
    }
}

impl From<HybridCache> for TieredCache {
    fn from(hybrid: HybridCache) -> Self {
        TieredCache::Hybrid(hybrid)
    }
}

#[async_trait]
impl Cache for TieredCache {
    async fn get(&self, key: &str) -> Result<String> {
        self.as_cache().get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.as_cache().exists(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.as_cache().set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.as_cache().del(key).await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.as_cache().incr(key).await
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<()> {
        self.as_cache().rpush(key, values).await
    }

    async fn blpop(&self, timeout: Duration, keys: &[String]) -> Result<Vec<String>> {
        self.as_cache().blpop(timeout, keys).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.as_cache().ltrim(key, start, stop).await
    }

    async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> Result<ScriptValue> {
        self.as_cache().eval(script, keys, args).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        self.as_cache().sadd(key, members).await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.as_cache().sismember(key, member).await
    }

    async fn get_or_set(&self, key: &str, ttl: Duration, fetch: FetchFuture) -> Result<String> {
        self.as_cache().get_or_set(key, ttl, fetch).await
    }

    async fn stats(&self) -> StatsSnapshot {
        self.as_cache().stats().await
    }

    async fn close(&self) -> Result<()> {
        self.as_cache().close().await
    }
}

//! Two-tier coordinator: a [`LocalCache`] in front of a shared remote store.
//!
//! ## Read path
//!
//! ```text
//! get(key)
//!   ↓
//! L1 hit? ──yes──→ return (no TTL refresh)
//!   ↓ no
//! L2 hit? ──yes──→ copy into L1 for `l1_population_ttl`, return
//!   ↓ no
//! NotFound / L2 error
//! ```
//!
//! ## Write path
//!
//! L2 is authoritative: its errors fail the call. L1 writes and deletes are
//! best-effort, logged and swallowed. Writes do not publish invalidations on
//! their own; the owner of the data calls
//! [`publish_invalidation`](crate::publish_invalidation) when other processes
//! may hold a copy.

use crate::config::HybridConfig;
use crate::contract::{Cache, FetchFuture, ScriptValue};
use crate::error::{CacheError, Result};
use crate::invalidation::{InvalidationListener, ListenerState};
use crate::local_cache::LocalCache;
use crate::pubsub::PubSub;
use crate::stampede::StampedeGuard;
use crate::stats::StatsSnapshot;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// L1 + L2 behind the single [`Cache`] contract.
///
/// Counters, lists, scripts and set membership go to L2 only. Clones share
/// the same tiers, guard and listener.
#[derive(Clone)]
pub struct HybridCache {
    inner: Arc<HybridInner>,
}

struct HybridInner {
    local: LocalCache,
    remote: Arc<dyn Cache>,
    guard: StampedeGuard,
    config: HybridConfig,
    listener: tokio::sync::Mutex<Option<InvalidationListener>>,
}

impl HybridCache {
    pub fn new(local: LocalCache, remote: Arc<dyn Cache>, config: HybridConfig) -> Self {
        Self {
            inner: Arc::new(HybridInner {
                local,
                remote,
                guard: StampedeGuard::new(),
                config,
                listener: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn local(&self) -> &LocalCache {
        &self.inner.local
    }

    pub fn remote(&self) -> &Arc<dyn Cache> {
        &self.inner.remote
    }

    pub fn config(&self) -> &HybridConfig {
        &self.inner.config
    }

    /// Subscribes this process's L1 to the invalidation channel.
    ///
    /// Returns once the subscription is confirmed. Calling it again restarts a
    /// listener that stopped after losing its subscription.
    pub async fn start_invalidator(&self, pubsub: Arc<dyn PubSub>) -> Result<()> {
        let mut slot = self.inner.listener.lock().await;
        let listener = slot.get_or_insert_with(|| {
            InvalidationListener::new(
                self.inner.local.clone(),
                pubsub,
                self.inner.config.invalidation_channel.clone(),
                self.inner.config.listener_shutdown_timeout(),
            )
        });
        listener.start().await
    }

    pub async fn stop_invalidator(&self) {
        if let Some(listener) = self.inner.listener.lock().await.as_ref() {
            listener.stop().await;
        }
    }

    pub async fn invalidator_state(&self) -> ListenerState {
        match self.inner.listener.lock().await.as_ref() {
            Some(listener) => listener.state(),
            None => ListenerState::Stopped,
        }
    }

    /// TTL for an L1 copy made on the `get_or_set` L2-hit path.
    fn population_ttl(&self, requested: Duration) -> Duration {
        let default = self.inner.config.l1_population_ttl();
        if requested.is_zero() {
            default
        } else {
            requested.min(default)
        }
    }

    async fn local_hit(&self, key: &str) -> Option<String> {
        match self.inner.local.get(key).await {
            Ok(value) => {
                tracing::debug!(key = %key, "L1 hit");
                Some(value)
            }
            Err(CacheError::NotFound) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "L1 read failed");
                None
            }
        }
    }

    async fn populate_local(&self, key: &str, value: String, ttl: Duration) {
        if let Err(e) = self.inner.local.set(key, value, ttl).await {
            tracing::warn!(key = %key, error = %e, "failed to populate L1");
        }
    }
}

#[async_trait]
impl Cache for HybridCache {
    async fn get(&self, key: &str) -> Result<String> {
        if let Some(value) = self.local_hit(key).await {
            return Ok(value);
        }

        let value = self.inner.remote.get(key).await?;
        tracing::debug!(key = %key, "L2 hit, promoting to L1");
        self.populate_local(key, value.clone(), self.inner.config.l1_population_ttl())
            .await;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.inner.local.exists(key).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "L1 exists check failed"),
        }
        self.inner.remote.exists(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.inner.remote.set(key, value.clone(), ttl).await?;

        if let Err(e) = self.inner.local.set(key, value, ttl).await {
            tracing::warn!(key = %key, error = %e, "L1 write failed");
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        if let Err(e) = self.inner.local.del(key).await {
            tracing::warn!(key = %key, error = %e, "L1 delete failed");
        }

        self.inner.remote.del(key).await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.inner.remote.incr(key).await
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<()> {
        self.inner.remote.rpush(key, values).await
    }

    async fn blpop(&self, timeout: Duration, keys: &[String]) -> Result<Vec<String>> {
        self.inner.remote.blpop(timeout, keys).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.inner.remote.ltrim(key, start, stop).await
    }

    async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> Result<ScriptValue> {
        self.inner.remote.eval(script, keys, args).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        self.inner.remote.sadd(key, members).await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.inner.remote.sismember(key, member).await
    }

    async fn get_or_set(&self, key: &str, ttl: Duration, fetch: FetchFuture) -> Result<String> {
        if let Some(value) = self.local_hit(key).await {
            return Ok(value);
        }

        match self.inner.remote.get(key).await {
            Ok(value) => {
                tracing::debug!(key = %key, "L2 hit, promoting to L1");
                self.populate_local(key, value.clone(), self.population_ttl(ttl))
                    .await;
                return Ok(value);
            }
            Err(CacheError::NotFound) => {}
            // An unhealthy L2 must not block the fill
            Err(e) => tracing::warn!(key = %key, error = %e, "L2 read failed, fetching"),
        }

        let cache = self.clone();
        let owned_key = key.to_owned();
        self.inner
            .guard
            .run(key, async move {
                let key = owned_key.as_str();
                // Another task may have filled L1 between our miss and the guard
                if let Some(value) = cache.inner.local.lookup(key) {
                    return Ok(value);
                }

                tracing::debug!(key = %key, "cache miss on both tiers, fetching");
                let value = fetch.await.map_err(CacheError::FetchFailed)?;

                if let Err(e) = cache.inner.remote.set(key, value.clone(), ttl).await {
                    tracing::warn!(key = %key, error = %e, "failed to store fetched value in L2");
                }
                cache.populate_local(key, value.clone(), ttl).await;
                Ok(value)
            })
            .await
    }

    async fn stats(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::new();
        snapshot.insert("local", self.inner.local.stats().await);
        snapshot.insert("remote", self.inner.remote.stats().await);
        snapshot.insert("in_flight", self.inner.guard.in_flight());
        snapshot.insert("coalesced", self.inner.guard.coalesced());
        if let Some(listener) = self.inner.listener.lock().await.as_ref() {
            snapshot.insert("invalidation", listener.stats());
        }
        snapshot
    }

    /// Stops the listener, then closes L1, then L2. Only L2's error is returned.
    async fn close(&self) -> Result<()> {
        self.stop_invalidator().await;

        if let Err(e) = self.inner.local.close().await {
            tracing::warn!(error = %e, "failed to close L1");
        }
        self.inner.remote.close().await
    }
}

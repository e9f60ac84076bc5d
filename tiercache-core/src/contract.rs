//! The capability set every tier implements.

use crate::error::{CacheError, Result, SharedError};
use crate::stats::StatsSnapshot;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// The fill computation handed to [`Cache::get_or_set`].
///
/// Rust futures are lazy, so passing the future itself is equivalent to
/// passing a fetch function: it is only polled when every tier misses, and
/// is dropped untouched on a hit.
pub type FetchFuture = BoxFuture<'static, std::result::Result<String, SharedError>>;

/// An owned reply from a scripted evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptValue {
    Nil,
    Int(i64),
    Text(String),
    Array(Vec<ScriptValue>),
    Okay,
}

/// Cache contract shared by the local tier, the remote tier and the hybrid
/// coordinator.
///
/// Misses are reported as [`CacheError::NotFound`]. Operations that have no
/// meaning for a tier fail with [`CacheError::Unsupported`] instead of
/// silently doing nothing. A `ttl` of [`Duration::ZERO`] means "no expiry".
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<String>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    async fn incr(&self, key: &str) -> Result<i64>;

    async fn rpush(&self, key: &str, values: &[String]) -> Result<()>;

    /// Pops the head of the first non-empty list, waiting up to `timeout`.
    /// Returns `[list_key, value]`, or `NotFound` when the wait expires.
    async fn blpop(&self, timeout: Duration, keys: &[String]) -> Result<Vec<String>>;

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> Result<ScriptValue>;

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    /// Returns the cached value or runs `fetch` once per key per process,
    /// caching and returning its result.
    async fn get_or_set(&self, key: &str, ttl: Duration, fetch: FetchFuture) -> Result<String>;

    async fn stats(&self) -> StatsSnapshot;

    /// Releases the resources held by the tier.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<C: Cache + ?Sized> Cache for Arc<C> {
    async fn get(&self, key: &str) -> Result<String> {
        (**self).get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        (**self).set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        (**self).del(key).await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        (**self).incr(key).await
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<()> {
        (**self).rpush(key, values).await
    }

    async fn blpop(&self, timeout: Duration, keys: &[String]) -> Result<Vec<String>> {
        (**self).blpop(timeout, keys).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        (**self).ltrim(key, start, stop).await
    }

    async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> Result<ScriptValue> {
        (**self).eval(script, keys, args).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        (**self).sadd(key, members).await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        (**self).sismember(key, member).await
    }

    async fn get_or_set(&self, key: &str, ttl: Duration, fetch: FetchFuture) -> Result<String> {
        (**self).get_or_set(key, ttl, fetch).await
    }

    async fn stats(&self) -> StatsSnapshot {
        (**self).stats().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// Convenience methods available on every [`Cache`].
#[async_trait]
pub trait CacheExt: Cache {
    /// [`Cache::get_or_set`] taking an async closure with any boxable error.
    ///
    /// ```ignore
    /// let report = cache
    ///     .get_or_set_with("report:2024", Duration::from_secs(60), || async {
    ///         build_report().await
    ///     })
    ///     .await?;
    /// ```
    async fn get_or_set_with<F, Fut, E>(&self, key: &str, ttl: Duration, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<String, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>> + 'static,
    {
        let fetch = async move { fetch().await.map_err(|e| SharedError::from(e.into())) }.boxed();
        self.get_or_set(key, ttl, fetch).await
    }

    /// `get` mapped to `Option`, keeping real failures as errors.
    async fn get_opt(&self, key: &str) -> Result<Option<String>> {
        match self.get(key).await {
            Ok(value) => Ok(Some(value)),
            Err(CacheError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

use crate::options::RedisOptions;
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolConfig, Runtime};
use futures_util::StreamExt;
use redis::{Cmd, FromRedisValue, Pipeline, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiercache_core::{
    Cache, CacheError, CacheStats, FetchFuture, PubSub, Result, ScriptValue, StampedeGuard,
    StatsSnapshot, Subscription,
};

const TIER: &str = "redis";

/// The shared remote tier (L2) backed by Redis.
///
/// Each contract method is one Redis command on a pooled connection, bounded
/// by the read or write timeout. A nil reply is [`CacheError::NotFound`];
/// everything else the server or the transport reports is passed through as
/// [`CacheError::Upstream`]. Subscriptions use their own dedicated
/// connection, outside the pool.
#[derive(Clone)]
pub struct RedisCache {
    inner: Arc<RedisInner>,
}

struct RedisInner {
    pool: Pool,
    client: redis::Client,
    options: RedisOptions,
    stats: CacheStats,
    guard: StampedeGuard,
    closed: AtomicBool,
}

impl RedisCache {
    /// Builds the pool and checks the server is reachable, opening
    /// `min_idle_conns` connections up front.
    pub async fn connect(options: RedisOptions) -> Result<Self> {
        if let Err(errors) = options.validate() {
            return Err(CacheError::upstream_msg(format!(
                "invalid redis options: {}",
                errors.join("; ")
            )));
        }

        let url = options.url();
        tracing::info!(options = ?options.sanitized(), "connecting to Redis");

        let client = redis::Client::open(url.as_str()).map_err(CacheError::upstream)?;

        let mut pool_config = PoolConfig::new(options.pool_size);
        pool_config.timeouts.wait = Some(options.dial_timeout());
        pool_config.timeouts.create = Some(options.dial_timeout());
        pool_config.timeouts.recycle = Some(options.read_timeout());

        let mut redis_config = deadpool_redis::Config::from_url(url);
        redis_config.pool = Some(pool_config);
        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(CacheError::upstream)?;

        let cache = Self {
            inner: Arc::new(RedisInner {
                pool,
                client,
                options,
                stats: CacheStats::new(),
                guard: StampedeGuard::new(),
                closed: AtomicBool::new(false),
            }),
        };
        cache.warm_up().await?;
        tracing::info!("connected to Redis");
        Ok(cache)
    }

    pub fn options(&self) -> &RedisOptions {
        &self.inner.options
    }

    pub fn pool(&self) -> &Pool {
        &self.inner.pool
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    async fn warm_up(&self) -> Result<()> {
        let idle = self.inner.options.min_idle_conns.min(self.inner.options.pool_size).max(1);
        let mut held = Vec::with_capacity(idle);
        for _ in 0..idle {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(CacheError::upstream)?;
            held.push(conn);
        }
        // Returned to the pool as idle connections
        drop(held);
        Ok(())
    }

    async fn connection(&self) -> Result<Connection> {
        if self.is_closed() {
            return Err(CacheError::Closed);
        }
        self.inner.pool.get().await.map_err(CacheError::upstream)
    }

    /// Runs one command, bounded by `deadline` when given.
    async fn query<T>(&self, cmd: &Cmd, deadline: Option<Duration>) -> Result<T>
    where
        T: FromRedisValue,
    {
        let mut conn = self.connection().await?;
        let outcome: redis::RedisResult<T> = match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, cmd.query_async(&mut conn)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.inner.stats.record_timeout();
                    return Err(CacheError::Timeout(deadline));
                }
            },
            None => cmd.query_async(&mut conn).await,
        };
        outcome.map_err(CacheError::upstream)
    }

    async fn read<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        self.query(cmd, Some(self.inner.options.read_timeout())).await
    }

    async fn write<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        self.query(cmd, Some(self.inner.options.write_timeout())).await
    }

    async fn write_pipeline(&self, pipe: &Pipeline) -> Result<()> {
        let mut conn = self.connection().await?;
        let deadline = self.inner.options.write_timeout();
        match tokio::time::timeout(deadline, pipe.query_async(&mut conn)).await {
            Ok(outcome) => {
                let outcome: redis::RedisResult<()> = outcome;
                outcome.map_err(CacheError::upstream)
            }
            Err(_) => {
                self.inner.stats.record_timeout();
                Err(CacheError::Timeout(deadline))
            }
        }
    }
}

/// Converts a script reply into an owned tree.
pub(crate) fn script_value(value: Value) -> ScriptValue {
    match value {
        Value::Nil => ScriptValue::Nil,
        Value::Int(n) => ScriptValue::Int(n),
        Value::Okay => ScriptValue::Okay,
        Value::BulkString(bytes) => ScriptValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Value::SimpleString(text) => ScriptValue::Text(text),
        Value::Boolean(flag) => ScriptValue::Int(i64::from(flag)),
        Value::Double(number) => ScriptValue::Text(number.to_string()),
        Value::Array(items) | Value::Set(items) => {
            ScriptValue::Array(items.into_iter().map(script_value).collect())
        }
        other => ScriptValue::Text(format!("{other:?}")),
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<String> {
        let value: Option<String> = self.read(redis::cmd("GET").arg(key)).await?;
        match value {
            Some(value) => {
                self.inner.stats.record_hit();
                Ok(value)
            }
            None => {
                self.inner.stats.record_miss();
                Err(CacheError::NotFound)
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let count: i64 = self.read(redis::cmd("EXISTS").arg(key)).await?;
        Ok(count > 0)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if !ttl.is_zero() {
            cmd.arg("PX").arg((ttl.as_millis() as u64).max(1));
        }
        self.write(&cmd).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        let _: i64 = self.write(redis::cmd("DEL").arg(key)).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.write(redis::cmd("INCR").arg(key)).await
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let _: i64 = self.write(redis::cmd("RPUSH").arg(key).arg(values)).await?;
        Ok(())
    }

    async fn blpop(&self, timeout: Duration, keys: &[String]) -> Result<Vec<String>> {
        let mut cmd = redis::cmd("BLPOP");
        cmd.arg(keys).arg(timeout.as_secs_f64());
        // The server blocks for `timeout` before answering; zero blocks forever
        let deadline = (!timeout.is_zero()).then(|| timeout + self.inner.options.read_timeout());
        let popped: Option<(String, String)> = self.query(&cmd, deadline).await?;
        match popped {
            Some((list, value)) => Ok(vec![list, value]),
            None => Err(CacheError::NotFound),
        }
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.write(redis::cmd("LTRIM").arg(key).arg(start).arg(stop)).await
    }

    async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> Result<ScriptValue> {
        let reply: Value = self
            .write(redis::cmd("EVAL").arg(script).arg(keys.len()).arg(keys).arg(args))
            .await?;
        Ok(script_value(reply))
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let _: i64 = self.write(redis::cmd("SADD").arg(key).arg(members)).await?;
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.read(redis::cmd("SISMEMBER").arg(key).arg(member)).await
    }

    async fn get_or_set(&self, key: &str, ttl: Duration, fetch: FetchFuture) -> Result<String> {
        match self.get(key).await {
            Ok(value) => return Ok(value),
            Err(CacheError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let cache = self.clone();
        let owned_key = key.to_owned();
        self.inner
            .guard
            .run(key, async move {
                let value = fetch.await.map_err(CacheError::FetchFailed)?;
                if let Err(e) = cache.set(&owned_key, value.clone(), ttl).await {
                    tracing::warn!(key = %owned_key, error = %e, "failed to store fetched value in Redis");
                }
                Ok(value)
            })
            .await
    }

    async fn stats(&self) -> StatsSnapshot {
        let status = self.inner.pool.status();
        let mut snapshot = StatsSnapshot::new();
        snapshot.insert("max_size", status.max_size as i64);
        snapshot.insert("size", status.size as i64);
        snapshot.insert("available", status.available as i64);
        snapshot.insert("waiting", status.waiting as i64);
        snapshot.insert("hits", self.inner.stats.hits());
        snapshot.insert("misses", self.inner.stats.misses());
        snapshot.insert("hit_ratio", self.inner.stats.hit_rate());
        snapshot.insert("timeouts", self.inner.stats.timeouts());

        let items = match self.read::<i64>(&redis::cmd("DBSIZE")).await {
            Ok(items) => items,
            Err(e) => {
                tracing::debug!(error = %e, "DBSIZE unavailable");
                -1
            }
        };
        snapshot.insert("items", items);
        snapshot.insert("in_flight", self.inner.guard.in_flight());
        snapshot.insert("coalesced", self.inner.guard.coalesced());
        snapshot
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.pool.close();
            tracing::info!("Redis pool closed");
        }
        Ok(())
    }
}

#[async_trait]
impl PubSub for RedisCache {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let _: i64 = self
            .write(redis::cmd("PUBLISH").arg(channel).arg(payload))
            .await?;
        Ok(())
    }

    /// All payloads go out in a single pipeline.
    async fn publish_many(&self, channel: &str, payloads: &[String]) -> Result<()> {
        if payloads.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for payload in payloads {
            pipe.cmd("PUBLISH").arg(channel).arg(payload).ignore();
        }
        self.write_pipeline(&pipe).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        if self.is_closed() {
            return Err(CacheError::Closed);
        }
        let dial = self.inner.options.dial_timeout();
        let mut pubsub = tokio::time::timeout(dial, self.inner.client.get_async_pubsub())
            .await
            .map_err(|_| CacheError::Timeout(dial))?
            .map_err(CacheError::upstream)?;

        // Resolves once the server has acknowledged the subscription
        pubsub.subscribe(channel).await.map_err(CacheError::upstream)?;
        tracing::info!(channel = %channel, "subscribed to Redis channel");

        let messages = pubsub
            .into_on_message()
            .map(|message| message.get_payload::<String>().map_err(CacheError::upstream));
        Ok(Box::pin(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_value_conversion() {
        assert_eq!(script_value(Value::Nil), ScriptValue::Nil);
        assert_eq!(script_value(Value::Int(7)), ScriptValue::Int(7));
        assert_eq!(script_value(Value::Okay), ScriptValue::Okay);
        assert_eq!(
            script_value(Value::BulkString(b"hello".to_vec())),
            ScriptValue::Text("hello".to_string())
        );
        assert_eq!(
            script_value(Value::Array(vec![Value::Int(1), Value::SimpleString("OK".into())])),
            ScriptValue::Array(vec![ScriptValue::Int(1), ScriptValue::Text("OK".into())])
        );
        assert_eq!(script_value(Value::Boolean(true)), ScriptValue::Int(1));
    }

    #[tokio::test]
    async fn test_invalid_options_are_rejected() {
        let options = RedisOptions {
            pool_size: 0,
            ..RedisOptions::default()
        };
        let error = RedisCache::connect(options).await.err().unwrap();
        assert!(error.to_string().contains("pool size"));
    }
}

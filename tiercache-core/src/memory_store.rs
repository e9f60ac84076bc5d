//! An in-process implementation of the remote store contract.
//!
//! `MemoryStore` mimics a shared key-value service: string values with TTL,
//! counters, lists with blocking pop, sets, and a publish/subscribe medium.
//! Clones are handles onto the same data, so several coordinators built over
//! clones of one store behave like several processes sharing one remote
//! server. It backs tests and single-node deployments that want the hybrid
//! shape without a network hop.

use crate::cache_entry::deadline;
use crate::contract::{Cache, FetchFuture, ScriptValue};
use crate::error::{CacheError, Result};
use crate::pubsub::{PubSub, Subscription};
use crate::stampede::StampedeGuard;
use crate::stats::{CacheStats, StatsSnapshot};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

const TIER: &str = "memory";
pub(crate) const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
enum Data {
    Text(String),
    List(VecDeque<String>),
    Set(HashSet<String>),
}

#[derive(Debug)]
struct Stored {
    data: Data,
    expires_at: Option<Instant>,
}

impl Stored {
    fn is_live(&self, now: Instant) -> bool {
        !matches!(self.expires_at, Some(at) if now >= at)
    }
}

#[derive(Default)]
struct StoreInner {
    data: Mutex<HashMap<String, Stored>>,
    channels: DashMap<String, broadcast::Sender<String>>,
    list_pushed: Notify,
    stats: CacheStats,
    published: AtomicU64,
    offline: AtomicBool,
    guard: StampedeGuard,
}

/// Shared in-process store implementing [`Cache`] and [`PubSub`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tiercache_core::{Cache, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// let other_process = store.clone();
///
/// store.set("greeting", "hi".to_string(), Duration::ZERO).await.unwrap();
/// assert_eq!(other_process.get("greeting").await.unwrap(), "hi");
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::upstream_msg(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value"
    ))
}

/// Resolves Redis-style inclusive indexes (negative counts from the end).
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the connection: while offline every
    /// operation fails with [`CacheError::Upstream`].
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Live keys currently stored.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .data
            .lock()
            .values()
            .filter(|stored| stored.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of subscribers currently attached to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drops every subscription to `channel`, as a lost server connection would.
    pub fn disconnect_subscribers(&self, channel: &str) {
        self.inner.channels.remove(channel);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(CacheError::upstream_msg("connection refused"))
        } else {
            Ok(())
        }
    }

    /// Runs `f` against the live value of `key`, expired values read as absent.
    fn with_live<T>(&self, key: &str, f: impl FnOnce(Option<&mut Stored>) -> T) -> T {
        let now = Instant::now();
        let mut data = self.inner.data.lock();
        if data.get(key).is_some_and(|stored| !stored.is_live(now)) {
            data.remove(key);
        }
        f(data.get_mut(key))
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.inner
            .channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn try_pop(&self, keys: &[String]) -> Result<Option<Vec<String>>> {
        let now = Instant::now();
        let mut data = self.inner.data.lock();
        for key in keys {
            let Some(stored) = data.get_mut(key) else {
                continue;
            };
            if !stored.is_live(now) {
                data.remove(key);
                continue;
            }
            let Data::List(list) = &mut stored.data else {
                return Err(wrong_type(key));
            };
            if let Some(value) = list.pop_front() {
                if list.is_empty() {
                    data.remove(key);
                }
                return Ok(Some(vec![key.clone(), value]));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Cache for MemoryStore {
    async fn get(&self, key: &str) -> Result<String> {
        self.ensure_online()?;
        let value = self.with_live(key, |stored| match stored.map(|s| &s.data) {
            Some(Data::Text(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        })?;
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
        self.ensure_online()?;
        Ok(self.with_live(key, |stored| stored.is_some()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.ensure_online()?;
        let stored = Stored {
            data: Data::Text(value),
            expires_at: deadline(Instant::now(), ttl),
        };
        self.inner.data.lock().insert(key.to_owned(), stored);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.ensure_online()?;
        self.inner.data.lock().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.ensure_online()?;
        self.with_live(key, |stored| match stored {
            Some(Stored {
                data: Data::Text(text),
                ..
            }) => {
                let next = text
                    .parse::<i64>()
                    .ok()
                    .and_then(|n| n.checked_add(1))
                    .ok_or_else(|| {
                        CacheError::upstream_msg("value is not an integer or out of range")
                    })?;
                *text = next.to_string();
                Ok(Some(next))
            }
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        })?
        .map_or_else(
            || {
                let stored = Stored {
                    data: Data::Text("1".to_string()),
                    expires_at: None,
                };
                self.inner.data.lock().insert(key.to_owned(), stored);
                Ok(1)
            },
            Ok,
        )
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<()> {
        self.ensure_online()?;
        let now = Instant::now();
        {
            let mut data = self.inner.data.lock();
            if data.get(key).is_some_and(|stored| !stored.is_live(now)) {
                data.remove(key);
            }
            let stored = data.entry(key.to_owned()).or_insert_with(|| Stored {
                data: Data::List(VecDeque::new()),
                expires_at: None,
            });
            let Data::List(list) = &mut stored.data else {
                return Err(wrong_type(key));
            };
            list.extend(values.iter().cloned());
        }
        self.inner.list_pushed.notify_waiters();
        Ok(())
    }

    async fn blpop(&self, timeout: Duration, keys: &[String]) -> Result<Vec<String>> {
        self.ensure_online()?;
        let wait = async {
            loop {
                let pushed = self.inner.list_pushed.notified();
                tokio::pin!(pushed);
                pushed.as_mut().enable();
                if let Some(popped) = self.try_pop(keys)? {
                    return Ok(popped);
                }
                pushed.await;
            }
        };

        // A zero timeout blocks indefinitely
        if timeout.is_zero() {
            return wait.await;
        }
        match tokio::time::timeout(timeout, wait).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CacheError::NotFound),
        }
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut data = self.inner.data.lock();
        if data.get(key).is_some_and(|stored| !stored.is_live(now)) {
            data.remove(key);
        }
        let Some(stored) = data.get_mut(key) else {
            return Ok(());
        };
        let Data::List(list) = &mut stored.data else {
            return Err(wrong_type(key));
        };
        match resolve_range(list.len(), start, stop) {
            Some((from, to)) => {
                list.truncate(to + 1);
                list.drain(..from);
            }
            None => {
                data.remove(key);
            }
        }
        Ok(())
    }

    async fn eval(&self, _script: &str, _keys: &[String], _args: &[String]) -> Result<ScriptValue> {
        Err(CacheError::unsupported("eval", TIER))
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut data = self.inner.data.lock();
        if data.get(key).is_some_and(|stored| !stored.is_live(now)) {
            data.remove(key);
        }
        let stored = data.entry(key.to_owned()).or_insert_with(|| Stored {
            data: Data::Set(HashSet::new()),
            expires_at: None,
        });
        let Data::Set(set) = &mut stored.data else {
            return Err(wrong_type(key));
        };
        set.extend(members.iter().cloned());
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.ensure_online()?;
        self.with_live(key, |stored| match stored.map(|s| &s.data) {
            Some(Data::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(false),
        })
    }

    async fn get_or_set(&self, key: &str, ttl: Duration, fetch: FetchFuture) -> Result<String> {
        match self.get(key).await {
            Ok(value) => return Ok(value),
            Err(CacheError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let store = self.clone();
        let owned_key = key.to_owned();
        self.inner
            .guard
            .run(key, async move {
                let value = fetch.await.map_err(CacheError::FetchFailed)?;
                if let Err(e) = store.set(&owned_key, value.clone(), ttl).await {
                    tracing::warn!(key = %owned_key, error = %e, "failed to store fetched value");
                }
                Ok(value)
            })
            .await
    }

    async fn stats(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::new();
        snapshot.insert("hits", self.inner.stats.hits());
        snapshot.insert("misses", self.inner.stats.misses());
        snapshot.insert("items", self.len());
        snapshot.insert("published", self.inner.published.load(Ordering::Relaxed));
        snapshot.insert("in_flight", self.inner.guard.in_flight());
        snapshot.insert("coalesced", self.inner.guard.coalesced());
        snapshot
    }

    /// The data outlives any single handle, so closing a handle is a no-op.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl PubSub for MemoryStore {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.ensure_online()?;
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        if let Some(sender) = self.inner.channels.get(channel) {
            // No subscribers is not an error, same as PUBLISH returning 0
            let _ = sender.send(payload.to_owned());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.ensure_online()?;
        let receiver = self.sender(channel).subscribe();
        let messages = stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(payload) => Some((Ok(payload), receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => Some((
                    Err(CacheError::upstream_msg(format!(
                        "subscriber lagged, {skipped} messages dropped"
                    ))),
                    receiver,
                )),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(Box::pin(messages))
    }
}

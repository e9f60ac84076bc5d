//! Cross-process L1 invalidation.
//!
//! Writers publish the raw key on a shared channel after a `set`/`del`; every
//! process holding a [`HybridCache`](crate::HybridCache) runs an
//! [`InvalidationListener`] that drops the key from its own L1. L2 is never
//! touched by the listener, it is already the source of the change.
//!
//! ```text
//! Process A: set("user:42") + publish_invalidation("user:42")
//!   ↓
//! PUBLISH cache:l1:invalidate "user:42"
//!   ↓
//! Process B: listener receives "user:42" → removes it from L1
//! Process C: listener receives "user:42" → removes it from L1
//! ```
//!
//! Keys ending in `:*` are accepted on the wire but not expanded locally.

use crate::error::Result;
use crate::local_cache::LocalCache;
use crate::pubsub::{PubSub, Subscription};
use crate::stats::StatsSnapshot;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WILDCARD_SUFFIX: &str = ":*";

/// Publishes one invalidation notice for `key` on `channel`.
pub async fn publish_invalidation<P>(pubsub: &P, channel: &str, key: &str) -> Result<()>
where
    P: PubSub + ?Sized,
{
    pubsub.publish(channel, key).await?;
    tracing::debug!(key = %key, channel = %channel, "published cache invalidation");
    Ok(())
}

/// Publishes one notice per key, batched where the medium supports it.
pub async fn publish_invalidation_multi<P>(pubsub: &P, channel: &str, keys: &[String]) -> Result<()>
where
    P: PubSub + ?Sized,
{
    if keys.is_empty() {
        return Ok(());
    }
    pubsub.publish_many(channel, keys).await?;
    tracing::debug!(count = keys.len(), channel = %channel, "published cache invalidations");
    Ok(())
}

/// Lifecycle of an [`InvalidationListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Stopped => "stopped",
            ListenerState::Starting => "starting",
            ListenerState::Running => "running",
            ListenerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

struct ListenerShared {
    state: Mutex<ListenerState>,
    received: AtomicU64,
    applied: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
}

impl ListenerShared {
    fn set_state(&self, state: ListenerState) {
        *self.state.lock() = state;
    }

    fn apply(&self, local: &LocalCache, payload: &str) {
        self.received.fetch_add(1, Ordering::Relaxed);

        if payload.is_empty() {
            self.ignored.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if payload.ends_with(WILDCARD_SUFFIX) {
            self.ignored.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(pattern = %payload, "wildcard invalidation ignored");
            return;
        }

        local.remove(payload);
        self.applied.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %payload, "received cache invalidation");
    }
}

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background task removing invalidated keys from one process's L1.
///
/// `Stopped → Starting → Running → Stopping → Stopped`. [`start`](Self::start)
/// returns once the channel has confirmed the subscription. Losing the
/// subscription moves the listener back to `Stopped`; it is not retried from
/// inside the listener, the owner restarts it.
pub struct InvalidationListener {
    local: LocalCache,
    pubsub: Arc<dyn PubSub>,
    channel: String,
    shutdown_timeout: Duration,
    shared: Arc<ListenerShared>,
    task: tokio::sync::Mutex<Option<RunningTask>>,
}

impl InvalidationListener {
    pub fn new(
        local: LocalCache,
        pubsub: Arc<dyn PubSub>,
        channel: impl Into<String>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            local,
            pubsub,
            channel: channel.into(),
            shutdown_timeout,
            shared: Arc::new(ListenerShared {
                state: Mutex::new(ListenerState::Stopped),
                received: AtomicU64::new(0),
                applied: AtomicU64::new(0),
                ignored: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Subscribes and spawns the receive loop. A no-op while already running.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() && self.state() == ListenerState::Running {
                return Ok(());
            }
        }
        // The previous loop may have ended on its own after losing the channel;
        // wait for it so its final state write cannot land after ours
        if let Some(previous) = task.take() {
            previous.token.cancel();
            if let Err(e) = previous.handle.await {
                tracing::debug!(channel = %self.channel, error = %e, "previous invalidation loop ended abnormally");
            }
        }

        self.shared.set_state(ListenerState::Starting);
        let subscription = match self.pubsub.subscribe(&self.channel).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.shared.set_state(ListenerState::Stopped);
                tracing::error!(channel = %self.channel, error = %e, "failed to subscribe to invalidation channel");
                return Err(e);
            }
        };
        self.shared.set_state(ListenerState::Running);
        tracing::info!(channel = %self.channel, "subscribed to invalidation channel");

        let token = CancellationToken::new();
        let handle = tokio::spawn(receive_loop(
            subscription,
            self.local.clone(),
            Arc::clone(&self.shared),
            token.clone(),
            self.channel.clone(),
        ));
        *task = Some(RunningTask { token, handle });
        Ok(())
    }

    /// Cancels the loop and waits up to the shutdown timeout for it to exit,
    /// aborting it past that point.
    pub async fn stop(&self) {
        let Some(RunningTask { token, mut handle }) = self.task.lock().await.take() else {
            return;
        };

        self.shared.set_state(ListenerState::Stopping);
        token.cancel();
        if tokio::time::timeout(self.shutdown_timeout, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!(
                channel = %self.channel,
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "invalidation listener did not stop in time, aborting"
            );
            handle.abort();
        }
        self.shared.set_state(ListenerState::Stopped);
        tracing::info!(channel = %self.channel, "invalidation listener stopped");
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state.lock()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Messages received, including ignored and failed ones.
    pub fn received(&self) -> u64 {
        self.shared.received.load(Ordering::Relaxed)
    }

    /// Keys removed from L1.
    pub fn applied(&self) -> u64 {
        self.shared.applied.load(Ordering::Relaxed)
    }

    /// Wildcard and empty payloads.
    pub fn ignored(&self) -> u64 {
        self.shared.ignored.load(Ordering::Relaxed)
    }

    /// Messages the medium failed to deliver or decode.
    pub fn failed(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::new();
        snapshot.insert("running", i64::from(self.state() == ListenerState::Running));
        snapshot.insert("received", self.received());
        snapshot.insert("applied", self.applied());
        snapshot.insert("ignored", self.ignored());
        snapshot.insert("failed", self.failed());
        snapshot
    }
}

impl Drop for InvalidationListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.token.cancel();
        }
    }
}

async fn receive_loop(
    mut subscription: Subscription,
    local: LocalCache,
    shared: Arc<ListenerShared>,
    token: CancellationToken,
    channel: String,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            message = subscription.next() => match message {
                Some(Ok(payload)) => shared.apply(&local, &payload),
                Some(Err(e)) => {
                    shared.received.fetch_add(1, Ordering::Relaxed);
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(channel = %channel, error = %e, "failed to process invalidation message");
                }
                None => {
                    tracing::error!(channel = %channel, "invalidation subscription closed, listener stopped");
                    break;
                }
            },
        }
    }

    drop(subscription);
    // `stop` owns the state while it is draining the loop
    let mut state = shared.state.lock();
    if *state == ListenerState::Running {
        *state = ListenerState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::CHANNEL_CAPACITY;
    use crate::{LocalCacheConfig, MemoryStore, DEFAULT_INVALIDATION_CHANNEL};

    fn listener(local: &LocalCache, store: &MemoryStore) -> InvalidationListener {
        InvalidationListener::new(
            local.clone(),
            Arc::new(store.clone()),
            DEFAULT_INVALIDATION_CHANNEL,
            Duration::from_secs(5),
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_literal_key_is_removed() {
        let store = MemoryStore::new();
        let local = LocalCache::new(LocalCacheConfig::with_max_keys(10));
        local.insert("user:42", "alice".into(), Duration::ZERO);
        local.insert("user:43", "bob".into(), Duration::ZERO);

        let listener = listener(&local, &store);
        listener.start().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Running);

        publish_invalidation(&store, DEFAULT_INVALIDATION_CHANNEL, "user:42")
            .await
            .unwrap();
        settle().await;

        assert!(!local.contains("user:42"));
        assert!(local.contains("user:43"));
        assert_eq!(listener.applied(), 1);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_wildcard_is_a_no_op() {
        let store = MemoryStore::new();
        let local = LocalCache::new(LocalCacheConfig::with_max_keys(10));
        local.insert("user:42", "alice".into(), Duration::ZERO);

        let listener = listener(&local, &store);
        listener.start().await.unwrap();
        publish_invalidation(&store, DEFAULT_INVALIDATION_CHANNEL, "user:*")
            .await
            .unwrap();
        publish_invalidation(&store, DEFAULT_INVALIDATION_CHANNEL, "")
            .await
            .unwrap();
        settle().await;

        assert!(local.contains("user:42"));
        assert_eq!(listener.received(), 2);
        assert_eq!(listener.ignored(), 2);
        assert_eq!(listener.applied(), 0);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_batch_publication() {
        let store = MemoryStore::new();
        let local = LocalCache::new(LocalCacheConfig::with_max_keys(10));
        for key in ["a", "b", "c"] {
            local.insert(key, key.to_string(), Duration::ZERO);
        }

        let listener = listener(&local, &store);
        listener.start().await.unwrap();
        let keys = vec!["a".to_string(), "c".to_string()];
        publish_invalidation_multi(&store, DEFAULT_INVALIDATION_CHANNEL, &keys)
            .await
            .unwrap();
        settle().await;

        assert!(!local.contains("a"));
        assert!(local.contains("b"));
        assert!(!local.contains("c"));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let store = MemoryStore::new();
        let local = LocalCache::new(LocalCacheConfig::default());
        let listener = listener(&local, &store);
        assert_eq!(listener.state(), ListenerState::Stopped);

        listener.start().await.unwrap();
        listener.start().await.unwrap();
        assert_eq!(store.subscriber_count(DEFAULT_INVALIDATION_CHANNEL), 1);

        listener.stop().await;
        assert_eq!(listener.state(), ListenerState::Stopped);
        settle().await;
        assert_eq!(store.subscriber_count(DEFAULT_INVALIDATION_CHANNEL), 0);

        // Stopping twice is harmless
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_subscription_loss_stops_listener() {
        let store = MemoryStore::new();
        let local = LocalCache::new(LocalCacheConfig::default());
        let listener = listener(&local, &store);
        listener.start().await.unwrap();

        store.disconnect_subscribers(DEFAULT_INVALIDATION_CHANNEL);
        settle().await;
        assert_eq!(listener.state(), ListenerState::Stopped);

        // The owner can restart it
        listener.start().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Running);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_aborts_loop_after_shutdown_timeout() {
        let store = MemoryStore::new();
        let local = LocalCache::new(LocalCacheConfig::default());
        let listener = InvalidationListener::new(
            local,
            Arc::new(store.clone()),
            DEFAULT_INVALIDATION_CHANNEL,
            Duration::ZERO,
        );
        listener.start().await.unwrap();

        listener.stop().await;
        assert_eq!(listener.state(), ListenerState::Stopped);
        settle().await;
        assert_eq!(store.subscriber_count(DEFAULT_INVALIDATION_CHANNEL), 0);

        listener.start().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Running);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_undeliverable_message_is_counted_and_loop_continues() {
        let store = MemoryStore::new();
        let local = LocalCache::new(LocalCacheConfig::default());
        local.insert("late", "v".into(), Duration::ZERO);
        let listener = listener(&local, &store);
        listener.start().await.unwrap();

        // Overrun the channel before the loop gets to run
        for i in 0..CHANNEL_CAPACITY + 10 {
            publish_invalidation(&store, DEFAULT_INVALIDATION_CHANNEL, &format!("k{i}"))
                .await
                .unwrap();
        }
        publish_invalidation(&store, DEFAULT_INVALIDATION_CHANNEL, "late")
            .await
            .unwrap();

        for _ in 0..10_000 {
            if !local.contains("late") {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!local.contains("late"));
        assert_eq!(listener.failed(), 1);
        assert_eq!(listener.state(), ListenerState::Running);
        assert_eq!(listener.stats().get("failed").and_then(|v| v.as_int()), Some(1));
        listener.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_right_after_subscription_loss() {
        let store = MemoryStore::new();
        let local = LocalCache::new(LocalCacheConfig::default());
        let listener = listener(&local, &store);

        for round in 0..20 {
            listener.start().await.unwrap();
            store.disconnect_subscribers(DEFAULT_INVALIDATION_CHANNEL);
            while listener.state() == ListenerState::Running {
                tokio::task::yield_now().await;
            }

            listener.start().await.unwrap();
            assert_eq!(listener.state(), ListenerState::Running);

            let key = format!("round:{round}");
            local.insert(&key, "v".into(), Duration::ZERO);
            publish_invalidation(&store, DEFAULT_INVALIDATION_CHANNEL, &key)
                .await
                .unwrap();
            for _ in 0..10_000 {
                if !local.contains(&key) {
                    break;
                }
                tokio::task::yield_now().await;
            }
            assert!(!local.contains(&key));
            assert_eq!(listener.state(), ListenerState::Running);
            store.disconnect_subscribers(DEFAULT_INVALIDATION_CHANNEL);
            while listener.state() == ListenerState::Running {
                tokio::task::yield_now().await;
            }
        }
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_listener_stopped() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let local = LocalCache::new(LocalCacheConfig::default());
        let listener = listener(&local, &store);

        assert!(listener.start().await.is_err());
        assert_eq!(listener.state(), ListenerState::Stopped);
    }
}

//! Per-key call coalescing for cache fills.
//!
//! When many callers miss on the same key at once, only the first one starts
//! the fill; everyone else awaits that same fill and receives a clone of its
//! outcome, value or error. The fill runs on its own task, so a caller that
//! gives up (its future is dropped) does not cancel the fill for the others.
//!
//! Coalescing is per process: N processes may each run one fill for the same
//! key concurrently.

use crate::error::{CacheError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type SharedFill = Shared<BoxFuture<'static, Result<String>>>;

/// Coalesces concurrent fills of the same key into one execution.
///
/// Cloning the guard yields another handle onto the same in-flight table.
///
/// # Examples
///
/// ```
/// use tiercache_core::StampedeGuard;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let guard = StampedeGuard::new();
/// let value = guard.run("report:2024", async { Ok("R1".to_string()) }).await;
/// assert_eq!(value.unwrap(), "R1");
/// assert_eq!(guard.in_flight(), 0);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct StampedeGuard {
    inner: Arc<GuardInner>,
}

#[derive(Default)]
struct GuardInner {
    in_flight: DashMap<String, SharedFill>,
    started: AtomicU64,
    coalesced: AtomicU64,
}

/// Removes the in-flight record when the fill task ends, even by panic.
struct InFlightCleanup {
    inner: Arc<GuardInner>,
    key: String,
}

impl Drop for InFlightCleanup {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
    }
}

impl StampedeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `fill` for `key` unless a fill for `key` is already in flight, in
    /// which case the caller waits for that one instead.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn run<F>(&self, key: &str, fill: F) -> Result<String>
    where
        F: Future<Output = Result<String>> + Send + 'static,
    {
        let shared = match self.inner.in_flight.entry(key.to_owned()) {
            Entry::Occupied(entry) => {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "joining in-flight fill");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                self.inner.started.fetch_add(1, Ordering::Relaxed);
                let cleanup = InFlightCleanup {
                    inner: Arc::clone(&self.inner),
                    key: key.to_owned(),
                };
                let task = tokio::spawn(async move {
                    let _cleanup = cleanup;
                    fill.await
                });
                let shared = async move {
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(join_error) => Err(CacheError::fetch_failed(format!(
                            "fill task failed: {join_error}"
                        ))),
                    }
                }
                .boxed()
                .shared();
                entry.insert(shared.clone());
                shared
            }
        };

        shared.await
    }

    /// Number of keys with a fill currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Whether a fill for `key` is currently running.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.in_flight.contains_key(key)
    }

    /// Fills started since creation.
    pub fn started(&self) -> u64 {
        self.inner.started.load(Ordering::Relaxed)
    }

    /// Callers that joined an existing fill instead of starting one.
    pub fn coalesced(&self) -> u64 {
        self.inner.coalesced.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fill() {
        let guard = StampedeGuard::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = guard.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                guard
                    .run("k", async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok("v".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "v");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(guard.started(), 1);
        assert_eq!(guard.coalesced(), 15);
        assert_eq!(guard.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_error_reaches_every_waiter() {
        let guard = StampedeGuard::new();

        let first = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .run("k", async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(CacheError::fetch_failed("boom"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = guard.run("k", async { Ok("never".to_string()) }).await;

        assert_eq!(second.unwrap_err().to_string(), "boom");
        assert_eq!(first.await.unwrap().unwrap_err().to_string(), "boom");
        assert_eq!(guard.started(), 1);
    }

    #[tokio::test]
    async fn test_record_cleared_after_completion() {
        let guard = StampedeGuard::new();
        assert_eq!(guard.run("k", async { Ok("1".to_string()) }).await.unwrap(), "1");
        assert!(!guard.is_in_flight("k"));
        // A later request starts a fresh fill
        assert_eq!(guard.run("k", async { Ok("2".to_string()) }).await.unwrap(), "2");
        assert_eq!(guard.started(), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let guard = StampedeGuard::new();
        let (a, b) = tokio::join!(
            guard.run("a", async { Ok("A".to_string()) }),
            guard.run("b", async { Ok("B".to_string()) })
        );
        assert_eq!(a.unwrap(), "A");
        assert_eq!(b.unwrap(), "B");
        assert_eq!(guard.coalesced(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_abort_fill() {
        let guard = StampedeGuard::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let initiator = {
            let guard = guard.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                guard
                    .run("k", async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("v".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.run("k", async { Ok("x".to_string()) }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        initiator.abort();
        assert_eq!(waiter.await.unwrap().unwrap(), "v");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_fill_is_reported_and_cleared() {
        let guard = StampedeGuard::new();
        let outcome = guard
            .run("k", async {
                if true {
                    panic!("fill exploded");
                }
                Ok(String::new())
            })
            .await;

        assert!(matches!(outcome, Err(CacheError::FetchFailed(_))));
        assert_eq!(guard.in_flight(), 0);
    }
}

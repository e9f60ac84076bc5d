use std::sync::Arc;
use std::time::Duration;

/// A type-erased error that can be handed to several waiters at once.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the cache tiers.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by the cache tiers.
///
/// `NotFound` is a distinguished miss, not a failure: callers branch on it to
/// tell a cold key apart from a broken store.
///
/// The enum is `Clone` because a single guarded fetch fans its outcome out to
/// every caller that coalesced onto it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The key is absent or has expired.
    #[error("cache miss")]
    NotFound,

    /// The operation has no meaning on this tier (e.g. counters on L1).
    #[error("{operation} is not supported by the {tier} tier")]
    Unsupported {
        operation: &'static str,
        tier: &'static str,
    },

    /// Transport or protocol failure talking to the remote store.
    #[error("remote store error: {0}")]
    Upstream(#[source] SharedError),

    /// A remote call did not complete before its deadline.
    #[error("remote store call timed out after {0:?}")]
    Timeout(Duration),

    /// The caller-supplied fetch failed during a guarded fill.
    #[error("{0}")]
    FetchFailed(#[source] SharedError),

    /// The tier has been closed.
    #[error("cache is closed")]
    Closed,
}

impl CacheError {
    /// Wraps any store error as [`CacheError::Upstream`].
    pub fn upstream<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CacheError::Upstream(Arc::new(error))
    }

    /// Builds an [`CacheError::Upstream`] from a plain message.
    pub fn upstream_msg(message: impl Into<String>) -> Self {
        CacheError::Upstream(Arc::new(Message(message.into())))
    }

    /// Wraps a fetch function failure as [`CacheError::FetchFailed`].
    pub fn fetch_failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        CacheError::FetchFailed(Arc::from(error.into()))
    }

    pub(crate) fn unsupported(operation: &'static str, tier: &'static str) -> Self {
        CacheError::Unsupported { operation, tier }
    }

    /// Returns `true` for a plain cache miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound)
    }
}

#[derive(Debug)]
struct Message(String);

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

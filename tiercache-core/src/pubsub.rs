//! Broadcast medium used purely for invalidation signalling.

use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Payloads delivered by a subscription, in publication order.
///
/// A per-message `Err` (e.g. an undecodable payload) does not end the
/// stream; the stream ending means the subscription itself is gone.
pub type Subscription = BoxStream<'static, Result<String>>;

/// A publish/subscribe medium shared by every process using the same store.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Publishes several payloads, in one round-trip where the medium allows it.
    async fn publish_many(&self, channel: &str, payloads: &[String]) -> Result<()> {
        for payload in payloads {
            self.publish(channel, payload).await?;
        }
        Ok(())
    }

    /// Subscribes to `channel`. Resolves only once the medium has confirmed
    /// the subscription, so nothing published afterwards is missed.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

use crate::error::Result;
use crate::types::{ChannelId, InboundMessage, OutboundMessage, UserId};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Platform identifier, e.g. "discord".
    fn channel_id(&self) -> &str;

    /// Start receiving messages. Push to tx for each inbound message.
    async fn start(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()>;

    /// Post into a shared channel.
    async fn send(&self, channel: &ChannelId, message: OutboundMessage) -> Result<()>;

    /// Private message to one user. Refusals surface as `ChannelError::Forbidden`.
    async fn send_direct(&self, user: &UserId, message: OutboundMessage) -> Result<()>;

    /// Inline reference to a user inside channel text.
    fn mention(&self, user: &UserId) -> String {
        format!("@{user}")
    }
}

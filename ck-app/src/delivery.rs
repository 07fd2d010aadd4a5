//! Bridges the engine's delivery boundary onto a channel adapter.

use async_trait::async_trait;
use ck_channels::{ChannelAdapter, ChannelError, ChannelId, OutboundMessage, UserId};
use ck_engine::{DeliveryError, DeliveryTransport, Destination, OperatorId};
use std::sync::Arc;

pub struct ChannelDelivery {
    adapter: Arc<dyn ChannelAdapter>,
}

impl ChannelDelivery {
    pub fn new(adapter: Arc<dyn ChannelAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl DeliveryTransport for ChannelDelivery {
    async fn send(&self, destination: &Destination, text: &str) -> Result<(), DeliveryError> {
        let result = match destination {
            Destination::Direct(operator) => {
                self.adapter
                    .send_direct(&UserId::new(operator.as_str()), OutboundMessage::text(text))
                    .await
            }
            Destination::Channel(channel) => {
                let message = OutboundMessage {
                    mention: leading_mention(text),
                    ..OutboundMessage::text(text)
                };
                self.adapter
                    .send(&ChannelId::new(channel.as_str()), message)
                    .await
            }
        };
        result.map_err(|e| match e {
            ChannelError::Forbidden(reason) => DeliveryError::PermissionDenied(reason),
            other => DeliveryError::Transport(other.to_string()),
        })
    }

    fn mention(&self, operator: &OperatorId) -> String {
        self.adapter.mention(&UserId::new(operator.as_str()))
    }
}

/// Used when no chat transport is configured; every send fails visibly.
pub struct DisabledDelivery;

#[async_trait]
impl DeliveryTransport for DisabledDelivery {
    async fn send(&self, destination: &Destination, _text: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Transport(format!(
            "no chat transport configured for {destination:?}"
        )))
    }
}

/// `<@123> text` or `<@!123> text` → `123`.
fn leading_mention(text: &str) -> Option<UserId> {
    let rest = text.trim_start().strip_prefix("<@")?;
    let rest = rest.strip_prefix('!').unwrap_or(rest);
    let (id, _) = rest.split_once('>')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(UserId::new(id))
}

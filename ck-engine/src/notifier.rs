//! Preferred-destination delivery with a visible fallback.

use crate::error::{DeliveryError, NotifyError};
use crate::preferences::PreferenceStore;
use crate::types::{ChannelRef, OperatorId};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Private message to the operator.
    Direct(OperatorId),
    /// Shared location where the triggering event was observed.
    Channel(ChannelRef),
}

/// Outbound boundary. Implementations map "operator refuses DMs" to
/// `DeliveryError::PermissionDenied`; everything else is `Transport`.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn send(&self, destination: &Destination, text: &str) -> Result<(), DeliveryError>;

    /// How to reference the operator inside a shared channel.
    fn mention(&self, operator: &OperatorId) -> String {
        format!("@{operator}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Direct,
    Fallback,
}

#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn DeliveryTransport>,
    preferences: Arc<PreferenceStore>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn DeliveryTransport>, preferences: Arc<PreferenceStore>) -> Self {
        Self {
            transport,
            preferences,
        }
    }

    /// Delivers according to the operator's preference.
    ///
    /// Only a permission refusal on the direct path falls back; other direct
    /// failures surface to the caller. Nothing is retried.
    pub async fn notify(
        &self,
        operator: &OperatorId,
        fallback: Option<&ChannelRef>,
        message: &str,
    ) -> Result<Delivery, NotifyError> {
        if self.preferences.get_or_default(operator).deliver_direct {
            match self
                .transport
                .send(&Destination::Direct(operator.clone()), message)
                .await
            {
                Ok(()) => return Ok(Delivery::Direct),
                Err(DeliveryError::PermissionDenied(reason)) => {
                    tracing::debug!(
                        operator = %operator,
                        reason = %reason,
                        "direct delivery refused; using fallback"
                    );
                }
                Err(e) => return Err(NotifyError::Direct(e)),
            }
        }
        self.notify_fallback(operator, fallback, message).await
    }

    /// Posts to the fallback location, mentioning the operator.
    pub async fn notify_fallback(
        &self,
        operator: &OperatorId,
        fallback: Option<&ChannelRef>,
        message: &str,
    ) -> Result<Delivery, NotifyError> {
        let channel = fallback.ok_or(NotifyError::NoFallback)?;
        let text = format!("{} {message}", self.transport.mention(operator));
        self.transport
            .send(&Destination::Channel(channel.clone()), &text)
            .await
            .map_err(NotifyError::Fallback)?;
        Ok(Delivery::Fallback)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records every send; refuses direct delivery for listed operators and
    /// can fail either path with a transport error.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) sent: Mutex<Vec<(Destination, String)>>,
        pub(crate) refuse_direct: Mutex<HashSet<OperatorId>>,
        pub(crate) fail_channels: Mutex<bool>,
        pub(crate) fail_direct: Mutex<bool>,
    }

    impl RecordingTransport {
        pub(crate) fn sent(&self) -> Vec<(Destination, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryTransport for RecordingTransport {
        async fn send(&self, destination: &Destination, text: &str) -> Result<(), DeliveryError> {
            match destination {
                Destination::Direct(op) if self.refuse_direct.lock().unwrap().contains(op) => {
                    return Err(DeliveryError::PermissionDenied("dms closed".to_string()));
                }
                Destination::Direct(_) if *self.fail_direct.lock().unwrap() => {
                    return Err(DeliveryError::Transport("gateway timeout".to_string()));
                }
                Destination::Channel(_) if *self.fail_channels.lock().unwrap() => {
                    return Err(DeliveryError::Transport("channel unavailable".to_string()));
                }
                _ => {}
            }
            self.sent
                .lock()
                .unwrap()
                .push((destination.clone(), text.to_string()));
            Ok(())
        }

        fn mention(&self, operator: &OperatorId) -> String {
            format!("<@{operator}>")
        }
    }
}

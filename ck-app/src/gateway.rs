//! Inbound dispatcher: watched-bot replies feed the engine, human text
//! commands get a reply in the same channel.

use crate::commands::{self, CommandContext};
use crate::config::CooldownKeeperConfig;
use ck_channels::{ChannelAdapter, InboundMessage, OutboundMessage};
use ck_engine::{ChannelRef, CooldownEngine, ObservedEvent, OperatorId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Gateway {
    cfg: Arc<CooldownKeeperConfig>,
    engine: Arc<CooldownEngine>,
    channel: Arc<dyn ChannelAdapter>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
}

impl Gateway {
    pub fn new(
        cfg: Arc<CooldownKeeperConfig>,
        engine: Arc<CooldownEngine>,
        channel: Arc<dyn ChannelAdapter>,
        inbound_rx: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        Self {
            cfg,
            engine,
            channel,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop(shutdown).await;
        })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut rx = self.inbound_rx.lock().await;
        loop {
            let inbound = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("gateway received shutdown signal");
                    return;
                }
                msg = rx.recv() => msg,
            };
            let Some(inbound) = inbound else {
                tracing::info!("inbound queue closed; gateway stopping");
                return;
            };
            // Delivery can be slow; one message never holds up the next.
            let this = self.clone();
            tokio::spawn(async move { this.handle_inbound(inbound).await });
        }
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(message_id = %inbound.message_id, author = %inbound.author.id)
    )]
    async fn handle_inbound(&self, inbound: InboundMessage) {
        if inbound.author.id.as_str() == self.cfg.discord.watched_bot_id {
            let outcome = self.engine.handle_event(observed_event(&inbound)).await;
            tracing::debug!(outcome = ?outcome, "watched bot message handled");
            return;
        }
        if inbound.author.bot {
            return;
        }

        let prefix = self.cfg.discord.command_prefix.as_str();
        let Some(parsed) = commands::parse(prefix, &inbound.content) else {
            return;
        };
        let user = OperatorId::new(inbound.author.id.as_str());
        let reply = match parsed {
            Ok(command) => {
                let ctx = CommandContext {
                    user: &user,
                    is_admin: self.cfg.is_admin(user.as_str()),
                    prefix,
                };
                commands::execute(&self.engine, &ctx, command).await
            }
            Err(usage) => usage,
        };

        let message = OutboundMessage {
            content: reply,
            reply_to_message_id: Some(inbound.message_id.clone()),
            mention: None,
        };
        if let Err(e) = self.channel.send(&inbound.channel_id, message).await {
            tracing::warn!(
                error = %e,
                channel = %inbound.channel_id,
                "command reply not delivered"
            );
        }
    }
}

/// The invoked command is the trigger, the invoking user the operator; the
/// first embed carries the title and summary.
pub fn observed_event(inbound: &InboundMessage) -> ObservedEvent {
    let interaction = inbound.interaction.as_ref();
    let embed = inbound.embeds.first();
    ObservedEvent {
        trigger: interaction.and_then(|i| i.name.clone()),
        title: embed.and_then(|e| e.title.clone()),
        operator: interaction
            .and_then(|i| i.user_id.as_ref())
            .map(|u| OperatorId::new(u.as_str())),
        body: Some(inbound.content.clone()).filter(|c| !c.trim().is_empty()),
        summary: embed.and_then(|e| e.description.clone()),
        origin: Some(ChannelRef::new(inbound.channel_id.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ck_channels::{Author, ChannelId, Embed, InteractionRef, UserId};
    use ck_engine::{DeliveryError, DeliveryTransport, Destination, MemoryBackend};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAdapter {
        sent: Mutex<Vec<(ChannelId, OutboundMessage)>>,
    }

    #[async_trait]
    impl ChannelAdapter for RecordingAdapter {
        fn channel_id(&self) -> &str {
            "recording"
        }

        async fn start(&self, _tx: mpsc::Sender<InboundMessage>) -> ck_channels::Result<()> {
            Ok(())
        }

        async fn send(
            &self,
            channel: &ChannelId,
            message: OutboundMessage,
        ) -> ck_channels::Result<()> {
            self.sent.lock().unwrap().push((channel.clone(), message));
            Ok(())
        }

        async fn send_direct(
            &self,
            _user: &UserId,
            _message: OutboundMessage,
        ) -> ck_channels::Result<()> {
            Ok(())
        }
    }

    struct NullTransport;

    #[async_trait]
    impl DeliveryTransport for NullTransport {
        async fn send(&self, _destination: &Destination, _text: &str) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn message(author: &str, bot: bool, content: &str) -> InboundMessage {
        InboundMessage {
            message_id: "m1".into(),
            channel_id: "c1".into(),
            guild_id: Some("g1".into()),
            author: Author {
                id: author.into(),
                bot,
            },
            content: content.to_string(),
            embeds: Vec::new(),
            interaction: None,
            received_at: chrono::Utc::now(),
        }
    }

    fn box_reply(operator: &str) -> InboundMessage {
        InboundMessage {
            embeds: vec![Embed {
                title: Some("Refreshing Box".to_string()),
                description: Some("You opened a box".to_string()),
            }],
            interaction: Some(InteractionRef {
                name: Some("open-boxes".to_string()),
                user_id: Some(operator.into()),
            }),
            ..message(crate::config::MAZOKU_BOT_ID, true, "")
        }
    }

    async fn gateway() -> (Arc<Gateway>, Arc<RecordingAdapter>) {
        let mut cfg = CooldownKeeperConfig::default();
        cfg.discord.admin_user_ids = vec!["1".to_string()];
        let settings = ck_engine::EngineSettings {
            sweep_interval: None,
            ..cfg.engine_settings()
        };
        let engine = CooldownEngine::start(
            settings,
            Arc::new(NullTransport),
            Arc::new(MemoryBackend::new()),
        )
        .await;
        let adapter = Arc::new(RecordingAdapter::default());
        let (_tx, rx) = mpsc::channel(8);
        let gateway = Gateway::new(Arc::new(cfg), Arc::new(engine), adapter.clone(), rx);
        (Arc::new(gateway), adapter)
    }

    #[test]
    fn maps_watched_bot_reply_onto_event() {
        let event = observed_event(&box_reply("42"));
        assert_eq!(event.trigger.as_deref(), Some("open-boxes"));
        assert_eq!(event.title.as_deref(), Some("Refreshing Box"));
        assert_eq!(event.operator, Some(OperatorId::new("42")));
        assert_eq!(event.body, None);
        assert_eq!(event.summary.as_deref(), Some("You opened a box"));
        assert_eq!(event.origin, Some(ChannelRef::new("c1")));
    }

    #[tokio::test(start_paused = true)]
    async fn watched_bot_reply_starts_cooldown() {
        let (gateway, adapter) = gateway().await;
        gateway.handle_inbound(box_reply("42")).await;
        assert_eq!(gateway.engine.active_cooldowns(&OperatorId::new("42")).len(), 1);
        assert!(adapter.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn impostor_bot_is_ignored() {
        let (gateway, _) = gateway().await;
        let impostor = InboundMessage {
            author: Author {
                id: "666".into(),
                bot: true,
            },
            ..box_reply("42")
        };
        gateway.handle_inbound(impostor).await;
        assert!(gateway.engine.active_cooldowns(&OperatorId::new("42")).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn human_command_gets_threaded_reply() {
        let (gateway, adapter) = gateway().await;
        gateway.handle_inbound(message("42", false, "!cooldowns")).await;
        gateway.handle_inbound(message("42", false, "just chatting")).await;
        let sent = adapter.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChannelId::new("c1"));
        assert_eq!(sent[0].1.reply_to_message_id, Some("m1".into()));
        assert_eq!(sent[0].1.content, "✅ You have no active cooldowns!");
    }

    #[tokio::test(start_paused = true)]
    async fn admin_list_comes_from_config() {
        let (gateway, adapter) = gateway().await;
        gateway.handle_inbound(message("1", false, "!setcooldown summon 600")).await;
        gateway.handle_inbound(message("2", false, "!reload")).await;
        let sent = adapter.sent.lock().unwrap();
        assert_eq!(sent[0].1.content, "✅ Default cooldown for Summon set to 600s.");
        assert_eq!(sent[1].1.content, "❌ Admin only.");
    }
}

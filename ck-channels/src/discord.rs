use crate::error::{ChannelError, Result};
use crate::traits::ChannelAdapter;
use crate::types::{
    Author, ChannelId, Embed, InboundMessage, InteractionRef, OutboundMessage, UserId,
};
use chrono::Utc;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT.
pub const DISCORD_DEFAULT_INTENTS: u64 = (1 << 9) | (1 << 12) | (1 << 15);

const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct DiscordAdapter {
    http: reqwest::Client,
    bot_token: String,
    gateway_intents: u64,
    dm_channels: Arc<DashMap<UserId, ChannelId>>,
}

impl DiscordAdapter {
    pub fn new(bot_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            bot_token: bot_token.to_string(),
            gateway_intents: DISCORD_DEFAULT_INTENTS,
            dm_channels: Arc::new(DashMap::new()),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("https://discord.com/api/v10{path}")
    }

    pub fn with_gateway_intents(mut self, gateway_intents: u64) -> Self {
        self.gateway_intents = gateway_intents;
        self
    }

    async fn post_message(&self, channel: &ChannelId, message: OutboundMessage) -> Result<()> {
        let url = self.api_url(&format!("/channels/{channel}/messages"));
        let body = message_body(&message);
        let resp = self
            .http
            .post(url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&body)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn dm_channel(&self, user: &UserId) -> Result<ChannelId> {
        if let Some(existing) = self.dm_channels.get(user) {
            return Ok(existing.value().clone());
        }
        let url = self.api_url("/users/@me/channels");
        let resp = self
            .http
            .post(url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&serde_json::json!({ "recipient_id": user.as_str() }))
            .send()
            .await?;
        let created: DiscordChannel = check_status(resp).await?.json().await?;
        let channel = ChannelId::new(created.id);
        self.dm_channels.insert(user.clone(), channel.clone());
        Ok(channel)
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for DiscordAdapter {
    fn channel_id(&self) -> &str {
        "discord"
    }

    async fn start(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let adapter = self.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.run_gateway_loop(tx).await {
                tracing::error!(%e, "discord gateway loop exited");
            }
        });
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(channel = %channel))]
    async fn send(&self, channel: &ChannelId, message: OutboundMessage) -> Result<()> {
        self.post_message(channel, message).await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(user = %user))]
    async fn send_direct(&self, user: &UserId, message: OutboundMessage) -> Result<()> {
        let channel = self.dm_channel(user).await?;
        self.post_message(&channel, message).await
    }

    fn mention(&self, user: &UserId) -> String {
        format!("<@{user}>")
    }
}

impl DiscordAdapter {
    /// Reconnects with capped exponential backoff until the inbound queue
    /// closes or Discord rejects the session outright.
    async fn run_gateway_loop(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let mut backoff = RECONNECT_BACKOFF_INITIAL;
        loop {
            let mut reached_ready = false;
            match self.run_gateway_once(tx.clone(), &mut reached_ready).await {
                Ok(()) | Err(ChannelError::QueueClosed) => {
                    tracing::info!("discord inbound queue closed; gateway stopping");
                    return Ok(());
                }
                Err(e @ ChannelError::GatewayRejected { .. }) => return Err(e),
                Err(e) => {
                    if reached_ready {
                        backoff = RECONNECT_BACKOFF_INITIAL;
                    }
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "discord gateway session ended; reconnecting"
                    );
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
        }
    }

    async fn run_gateway_once(
        &self,
        tx: mpsc::Sender<InboundMessage>,
        reached_ready: &mut bool,
    ) -> Result<()> {
        let (ws, _) = tokio_tungstenite::connect_async(DISCORD_GATEWAY_URL).await?;
        let (write, mut read) = ws.split();
        let write = Arc::new(Mutex::new(write));

        // HELLO.
        let heartbeat_interval_ms: u64 = if let Some(msg) = read.next().await {
            let msg = msg?;
            let v: serde_json::Value = serde_json::from_str(msg.to_text()?)?;
            v.get("d")
                .and_then(|d| d.get("heartbeat_interval"))
                .and_then(|x| x.as_u64())
                .ok_or_else(|| {
                    ChannelError::Gateway("HELLO missing heartbeat_interval".to_string())
                })?
        } else {
            return Err(ChannelError::Gateway("closed before HELLO".to_string()));
        };

        // IDENTIFY.
        let identify = serde_json::json!({
            "op": 2,
            "d": {
                "token": format!("Bot {}", self.bot_token),
                "intents": self.gateway_intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "cooldown-keeper",
                    "device": "cooldown-keeper"
                }
            }
        });
        write
            .lock()
            .await
            .send(Message::Text(identify.to_string().into()))
            .await?;

        let seq: Arc<RwLock<Option<i64>>> = Arc::new(RwLock::new(None));
        let mut bot_user_id: Option<String> = None;

        let _heartbeat = {
            let write = write.clone();
            let seq = seq.clone();
            AbortOnDrop(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_millis(heartbeat_interval_ms.max(1)));
                loop {
                    interval.tick().await;
                    let s = *seq.read().await;
                    let payload = serde_json::json!({ "op": 1, "d": s });
                    if write
                        .lock()
                        .await
                        .send(Message::Text(payload.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }))
        };

        while let Some(msg) = read.next().await {
            let txt = match msg? {
                Message::Text(txt) => txt,
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((0, String::new()));
                    if is_fatal_close_code(code) {
                        return Err(ChannelError::GatewayRejected { code, reason });
                    }
                    return Err(ChannelError::Gateway(format!(
                        "closed by server: code={code} reason={reason}"
                    )));
                }
                _ => continue,
            };
            let v: serde_json::Value = serde_json::from_str(txt.as_str())?;

            if let Some(s) = v.get("s").and_then(|s| s.as_i64()) {
                *seq.write().await = Some(s);
            }

            let op = v
                .get("op")
                .and_then(|o| o.as_i64())
                .ok_or_else(|| ChannelError::Gateway("payload missing op".to_string()))?;
            match op {
                0 => {}
                1 => {
                    let s = *seq.read().await;
                    let payload = serde_json::json!({ "op": 1, "d": s });
                    write
                        .lock()
                        .await
                        .send(Message::Text(payload.to_string().into()))
                        .await?;
                    continue;
                }
                7 => return Err(ChannelError::Gateway("server requested reconnect".to_string())),
                9 => return Err(ChannelError::Gateway("invalid session".to_string())),
                _ => continue,
            }

            match v.get("t").and_then(|t| t.as_str()) {
                Some("READY") => {
                    bot_user_id = v
                        .get("d")
                        .and_then(|d| d.get("user"))
                        .and_then(|u| u.get("id"))
                        .and_then(|id| id.as_str())
                        .map(|s| s.to_string());
                    *reached_ready = true;
                    tracing::info!(bot_user_id = ?bot_user_id, "discord gateway ready");
                }
                Some("MESSAGE_CREATE") => {
                    let payload = v.get("d").cloned().ok_or_else(|| {
                        ChannelError::Gateway("MESSAGE_CREATE missing payload".to_string())
                    })?;
                    let inbound = match parse_message_create(payload) {
                        Ok(inbound) => inbound,
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping undecodable MESSAGE_CREATE");
                            continue;
                        }
                    };
                    if bot_user_id.as_deref() == Some(inbound.author.id.as_str()) {
                        continue;
                    }
                    tx.send(inbound)
                        .await
                        .map_err(|_| ChannelError::QueueClosed)?;
                }
                Some(_) | None => {}
            }
        }

        Err(ChannelError::Gateway("stream ended unexpectedly".to_string()))
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// 4004 authentication failed, 4010-4014 shard/version/intent problems.
fn is_fatal_close_code(code: u16) -> bool {
    matches!(code, 4004 | 4010..=4014)
}

fn message_body(message: &OutboundMessage) -> serde_json::Value {
    let users: Vec<&str> = message.mention.iter().map(|u| u.as_str()).collect();
    let mut body = serde_json::json!({
        "content": message.content,
        "allowed_mentions": { "parse": [], "users": users },
    });
    if let Some(reply_to) = &message.reply_to_message_id {
        body["message_reference"] = serde_json::json!({
            "message_id": reply_to.as_str(),
            "fail_if_not_exists": false,
        });
    }
    body
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::FORBIDDEN {
        return Err(ChannelError::Forbidden(body));
    }
    Err(ChannelError::Http {
        status: status.as_u16(),
        body,
    })
}

fn parse_message_create(payload: serde_json::Value) -> Result<InboundMessage> {
    let event: DiscordMessageCreate = serde_json::from_value(payload)?;
    let interaction = merge_interaction(event.interaction_metadata, event.interaction);
    Ok(InboundMessage {
        message_id: event.id.into(),
        channel_id: event.channel_id.into(),
        guild_id: event.guild_id.map(Into::into),
        author: Author {
            id: event.author.id.into(),
            bot: event.author.bot,
        },
        content: event.content,
        embeds: event
            .embeds
            .into_iter()
            .map(|e| Embed {
                title: e.title,
                description: e.description,
            })
            .collect(),
        interaction,
        received_at: Utc::now(),
    })
}

/// `interaction_metadata` wins; the deprecated `interaction` object fills gaps.
fn merge_interaction(
    metadata: Option<DiscordInteraction>,
    legacy: Option<DiscordInteraction>,
) -> Option<InteractionRef> {
    if metadata.is_none() && legacy.is_none() {
        return None;
    }
    let (meta_name, meta_user) = metadata.map(|m| (m.name, m.user)).unwrap_or_default();
    let (legacy_name, legacy_user) = legacy.map(|l| (l.name, l.user)).unwrap_or_default();
    Some(InteractionRef {
        name: meta_name.or(legacy_name),
        user_id: meta_user.or(legacy_user).map(|u| UserId::new(u.id)),
    })
}

#[derive(Debug, Deserialize)]
struct DiscordMessageCreate {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    content: String,
    author: DiscordUser,
    #[serde(default)]
    embeds: Vec<DiscordEmbed>,
    #[serde(default)]
    interaction_metadata: Option<DiscordInteraction>,
    #[serde(default)]
    interaction: Option<DiscordInteraction>,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct DiscordEmbed {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordInteraction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    user: Option<DiscordUser>,
}

#[derive(Debug, Deserialize)]
struct DiscordChannel {
    id: String,
}

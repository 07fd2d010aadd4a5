//! Discord transport for cooldown-keeper.
//!
//! Adapters are pure I/O: they convert platform messages to/from
//! `InboundMessage` / `OutboundMessage`.

mod discord;
mod error;
mod traits;
mod types;

pub use discord::{DISCORD_DEFAULT_INTENTS, DiscordAdapter};
pub use error::{ChannelError, Result};
pub use traits::ChannelAdapter;
pub use types::{
    Author, ChannelId, Embed, GuildId, InboundMessage, InteractionRef, MessageId,
    OutboundMessage, UserId,
};

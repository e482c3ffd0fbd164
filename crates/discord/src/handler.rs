//! Discord event handler for serenity.
//!
//! Turns gateway events into [`NativeEvent`]s for the inbound relay and keeps
//! the [`GuildDirectory`] in step with the guilds the bot can see.

use {
    serenity::{
        all::{
            ChannelType, Context, EventHandler, GatewayIntents, Guild, GuildChannel, Message,
            Ready, UnavailableGuild,
        },
        async_trait,
    },
    tokio::sync::mpsc::{self, error::TrySendError},
    tracing::{debug, info, warn},
};

use crate::{
    inbound::BotUserId,
    search::{ChannelEntry, ChannelKind, GuildDirectory, GuildEntry},
    types::{NativeAttachment, NativeEvent, user_avatar_url},
};

/// Handler for Discord gateway events.
pub struct DiscordHandler {
    pub bot_user_id: BotUserId,
    pub events: mpsc::Sender<NativeEvent>,
    pub guilds: GuildDirectory,
}

impl DiscordHandler {
    /// Required gateway intents for the bot.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
    }
}

fn native_event(msg: &Message) -> NativeEvent {
    let avatar_hash = msg.author.avatar.map(|hash| hash.to_string());
    NativeEvent {
        message_id: msg.id.to_string(),
        channel_id: msg.channel_id.to_string(),
        author_id: msg.author.id.to_string(),
        author_username: msg.author.name.clone(),
        author_avatar_url: user_avatar_url(msg.author.id.get(), avatar_hash.as_deref()),
        proxy_id: msg.webhook_id.map(|id| id.to_string()),
        content: msg.content.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(|att| NativeAttachment {
                id: att.id.to_string(),
                url: att.url.clone(),
            })
            .collect(),
    }
}

fn channel_entry(channel: &GuildChannel) -> ChannelEntry {
    ChannelEntry {
        id: channel.id.to_string(),
        name: channel.name.clone(),
        kind: if channel.kind == ChannelType::Text {
            ChannelKind::Text
        } else {
            ChannelKind::Other
        },
        position: channel.position,
    }
}

fn guild_entry(guild: &Guild) -> GuildEntry {
    let mut entry = GuildEntry::new(
        guild.id.to_string(),
        guild.name.clone(),
        guild.icon.map(|hash| hash.to_string()),
    );
    entry.channels = guild.channels.values().map(channel_entry).collect();
    entry
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            bot_name = %ready.user.name,
            bot_id = %ready.user.id,
            guilds = ready.guilds.len(),
            "discord bot ready"
        );
        if self.bot_user_id.set(ready.user.id.to_string()).is_err() {
            debug!("bot user id already recorded");
        }
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        match self.events.try_send(native_event(&msg)) {
            Ok(()) => {},
            Err(TrySendError::Full(event)) => {
                warn!(
                    message_id = %event.message_id,
                    channel_id = %event.channel_id,
                    "native event queue full, dropping message"
                );
            },
            Err(TrySendError::Closed(_)) => {
                debug!("native event queue closed");
            },
        }
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        debug!(guild_id = %guild.id, name = %guild.name, "guild available");
        self.guilds.upsert_guild(guild_entry(&guild));
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // An outage also arrives as a delete, with `unavailable` set.
        if incomplete.unavailable {
            return;
        }
        debug!(guild_id = %incomplete.id, "guild removed");
        self.guilds.remove_guild(&incomplete.id.to_string());
    }

    async fn channel_create(&self, _ctx: Context, channel: GuildChannel) {
        self.guilds
            .upsert_channel(&channel.guild_id.to_string(), channel_entry(&channel));
    }

    async fn channel_update(&self, _ctx: Context, _old: Option<GuildChannel>, new: GuildChannel) {
        self.guilds
            .upsert_channel(&new.guild_id.to_string(), channel_entry(&new));
    }

    async fn channel_delete(
        &self,
        _ctx: Context,
        channel: GuildChannel,
        _messages: Option<Vec<Message>>,
    ) {
        self.guilds
            .remove_channel(&channel.guild_id.to_string(), &channel.id.to_string());
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_cover_guild_messages() {
        let intents = DiscordHandler::intents();
        assert!(intents.contains(GatewayIntents::GUILDS));
        assert!(intents.contains(GatewayIntents::GUILD_MESSAGES));
        assert!(intents.contains(GatewayIntents::MESSAGE_CONTENT));
        assert!(!intents.contains(GatewayIntents::DIRECT_MESSAGES));
    }
}

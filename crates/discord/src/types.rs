use secrecy::Secret;

/// Display-name prefix marking webhooks owned by this bridge.
pub const BRIDGE_TAG: &str = "ChatPlug ";

/// Icon given to webhooks the bridge creates.
pub const DEFAULT_PROXY_AVATAR: &str = "https://i.imgur.com/l2QP9Go.png";

/// Whether a webhook display name marks it as one of ours.
pub fn is_bridge_name(name: &str) -> bool {
    name.starts_with(BRIDGE_TAG)
}

/// A webhook the bridge posts through to appear as arbitrary users in one
/// channel.
#[derive(Clone)]
pub struct ProxyIdentity {
    pub channel_id: String,
    pub proxy_id: String,
    pub proxy_token: Secret<String>,
    /// Full display name; always begins with [`BRIDGE_TAG`].
    pub name: String,
}

impl std::fmt::Debug for ProxyIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyIdentity")
            .field("channel_id", &self.channel_id)
            .field("proxy_id", &self.proxy_id)
            .field("proxy_token", &"[REDACTED]")
            .field("name", &self.name)
            .finish()
    }
}

/// A message created on Discord, reduced to what the inbound relay needs.
#[derive(Debug, Clone, Default)]
pub struct NativeEvent {
    pub message_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author_username: String,
    /// Avatar URL already sized for the hub.
    pub author_avatar_url: String,
    /// Set when the message was posted through a webhook.
    pub proxy_id: Option<String>,
    pub content: String,
    pub attachments: Vec<NativeAttachment>,
}

#[derive(Debug, Clone)]
pub struct NativeAttachment {
    pub id: String,
    pub url: String,
}

const CDN_BASE: &str = "https://cdn.discordapp.com";

/// Avatar URL for a user, requested at "medium" size.
///
/// Users without a custom avatar get one of Discord's default avatars.
pub fn user_avatar_url(user_id: u64, avatar_hash: Option<&str>) -> String {
    match avatar_hash {
        Some(hash) if !hash.is_empty() => {
            let ext = if hash.starts_with("a_") {
                "gif"
            } else {
                "png"
            };
            format!("{CDN_BASE}/avatars/{user_id}/{hash}.{ext}?size=medium")
        },
        _ => format!("{CDN_BASE}/embed/avatars/{}.png", (user_id >> 22) % 6),
    }
}

/// Icon URL for a guild, or an empty string when it has none.
pub fn guild_icon_url(guild_id: &str, icon_hash: Option<&str>) -> String {
    match icon_hash {
        Some(hash) if !hash.is_empty() => format!("{CDN_BASE}/icons/{guild_id}/{hash}.png"),
        _ => String::new(),
    }
}

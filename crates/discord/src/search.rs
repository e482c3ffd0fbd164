//! Channel discovery for hub-side search.

use std::sync::{Arc, RwLock};

use {
    chatplug_hub::{Hub, SearchRequest, SearchResult},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::types::guild_icon_url;

/// Upper bound on results returned for one query.
pub const MAX_SEARCH_RESULTS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub position: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildEntry {
    pub id: String,
    pub name: String,
    pub icon_hash: Option<String>,
    pub channels: Vec<ChannelEntry>,
}

impl GuildEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>, icon_hash: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon_hash,
            channels: Vec::new(),
        }
    }

    fn sort_channels(&mut self) {
        self.channels
            .sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
    }
}

/// Guilds and channels visible to the bot, in discovery order.
#[derive(Clone, Default)]
pub struct GuildDirectory {
    guilds: Arc<RwLock<Vec<GuildEntry>>>,
}

impl GuildDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a guild. A replaced guild keeps its place.
    pub fn upsert_guild(&self, mut guild: GuildEntry) {
        guild.sort_channels();
        let mut guilds = self.guilds.write().unwrap_or_else(|e| e.into_inner());
        match guilds.iter_mut().find(|g| g.id == guild.id) {
            Some(existing) => *existing = guild,
            None => guilds.push(guild),
        }
    }

    pub fn remove_guild(&self, guild_id: &str) {
        let mut guilds = self.guilds.write().unwrap_or_else(|e| e.into_inner());
        guilds.retain(|g| g.id != guild_id);
    }

    pub fn upsert_channel(&self, guild_id: &str, channel: ChannelEntry) {
        let mut guilds = self.guilds.write().unwrap_or_else(|e| e.into_inner());
        let Some(guild) = guilds.iter_mut().find(|g| g.id == guild_id) else {
            debug!(guild_id, channel_id = %channel.id, "channel for unknown guild ignored");
            return;
        };
        match guild.channels.iter_mut().find(|c| c.id == channel.id) {
            Some(existing) => *existing = channel,
            None => guild.channels.push(channel),
        }
        guild.sort_channels();
    }

    pub fn remove_channel(&self, guild_id: &str, channel_id: &str) {
        let mut guilds = self.guilds.write().unwrap_or_else(|e| e.into_inner());
        if let Some(guild) = guilds.iter_mut().find(|g| g.id == guild_id) {
            guild.channels.retain(|c| c.id != channel_id);
        }
    }

    /// Text channels whose own name or guild name contains `query`
    /// (case-sensitive), capped at [`MAX_SEARCH_RESULTS`].
    pub fn search(&self, query: &str) -> Vec<SearchResult> {
        let guilds = self.guilds.read().unwrap_or_else(|e| e.into_inner());
        guilds
            .iter()
            .flat_map(|guild| {
                let guild_matches = guild.name.contains(query);
                guild
                    .channels
                    .iter()
                    .filter(|c| c.kind == ChannelKind::Text)
                    .filter(move |c| guild_matches || c.name.contains(query))
                    .map(move |c| SearchResult {
                        display_name: format!("{} - {}", guild.name, c.name),
                        icon_url: guild_icon_url(&guild.id, guild.icon_hash.as_deref()),
                        origin_id: c.id.clone(),
                    })
            })
            .take(MAX_SEARCH_RESULTS)
            .collect()
    }
}

pub struct ChannelSearchResponder {
    hub: Arc<dyn Hub>,
    directory: GuildDirectory,
}

impl ChannelSearchResponder {
    pub fn new(hub: Arc<dyn Hub>, directory: GuildDirectory) -> Self {
        Self { hub, directory }
    }

    pub fn search(&self, query: &str) -> Vec<SearchResult> {
        self.directory.search(query)
    }

    pub async fn run(self, mut requests: mpsc::Receiver<SearchRequest>, cancel: CancellationToken) {
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => {
                        info!("hub search stream closed");
                        break;
                    },
                },
            };

            let results = self.search(&request.query);
            debug!(query = %request.query, count = results.len(), "answering search");
            if let Err(e) = self.hub.set_search_response(&request.query, results).await {
                warn!(query = %request.query, error = %e, "failed to send search response");
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::testing::FakeHub};

    fn text(id: &str, name: &str, position: u16) -> ChannelEntry {
        ChannelEntry {
            id: id.into(),
            name: name.into(),
            kind: ChannelKind::Text,
            position,
        }
    }

    fn voice(id: &str, name: &str) -> ChannelEntry {
        ChannelEntry {
            id: id.into(),
            name: name.into(),
            kind: ChannelKind::Other,
            position: 0,
        }
    }

    fn test_guild() -> GuildDirectory {
        let dir = GuildDirectory::new();
        let mut guild = GuildEntry::new("1", "Test Guild", Some("abc".into()));
        guild.channels = vec![
            text("11", "general-chat", 0),
            voice("12", "general-voice"),
            text("13", "random", 1),
        ];
        dir.upsert_guild(guild);
        dir
    }

    #[test]
    fn matches_channel_name() {
        let results = test_guild().search("general");
        assert_eq!(results, vec![SearchResult {
            display_name: "Test Guild - general-chat".into(),
            icon_url: "https://cdn.discordapp.com/icons/1/abc.png".into(),
            origin_id: "11".into(),
        }]);
    }

    #[test]
    fn guild_name_match_returns_all_text_channels() {
        let results = test_guild().search("Test");
        let ids: Vec<_> = results.iter().map(|r| r.origin_id.as_str()).collect();
        assert_eq!(ids, vec!["11", "13"]);
    }

    #[test]
    fn search_is_case_sensitive() {
        assert!(test_guild().search("GENERAL").is_empty());
    }

    #[test]
    fn results_are_capped() {
        let dir = GuildDirectory::new();
        for g in 0..3 {
            let mut guild = GuildEntry::new(format!("g{g}"), format!("Guild {g}"), None);
            for c in 0..20u16 {
                guild.channels.push(text(&format!("g{g}-{c}"), "chat", c));
                guild.channels.push(voice(&format!("g{g}-v{c}"), "chat"));
            }
            dir.upsert_guild(guild);
        }

        let results = dir.search("chat");
        assert_eq!(results.len(), MAX_SEARCH_RESULTS);
        assert!(results.iter().all(|r| !r.origin_id.contains('v')));
        // Guild order is discovery order.
        assert!(results[..20].iter().all(|r| r.origin_id.starts_with("g0")));
        assert!(results[0].icon_url.is_empty());
    }

    #[test]
    fn channel_and_guild_updates() {
        let dir = test_guild();
        dir.upsert_channel("1", text("14", "general-two", 5));
        dir.upsert_channel("1", text("11", "renamed", 0));
        dir.remove_channel("1", "13");
        dir.upsert_channel("missing", text("99", "general", 0));

        let ids: Vec<_> = dir
            .search("Test")
            .into_iter()
            .map(|r| r.origin_id)
            .collect();
        assert_eq!(ids, vec!["11", "14"]);
        assert_eq!(dir.search("general").len(), 1);

        dir.remove_guild("1");
        assert!(dir.search("").is_empty());
    }

    #[tokio::test]
    async fn run_answers_each_request() {
        let hub = Arc::new(FakeHub::default());
        let responder = ChannelSearchResponder::new(hub.clone(), test_guild());

        let (tx, rx) = mpsc::channel(4);
        tx.send(SearchRequest {
            query: "general".into(),
        })
        .await
        .unwrap();
        tx.send(SearchRequest {
            query: "nothing".into(),
        })
        .await
        .unwrap();
        drop(tx);

        responder.run(rx, CancellationToken::new()).await;

        let responses = hub.search_responses.lock().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].0, "general");
        assert_eq!(responses[0].1.len(), 1);
        assert!(responses[1].1.is_empty());
    }
}

//! Startup sequencing and supervision of the relay loops.

use std::sync::Arc;

use {
    chatplug_hub::{Hub, InboundHubMessage, SearchRequest},
    secrecy::ExposeSecret,
    serenity::Client,
    tokio::{
        sync::{OnceCell, mpsc, watch},
        task::{JoinHandle, JoinSet},
    },
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
};

use crate::{
    attachment::AttachmentFetcher,
    config::{BridgeConfig, SessionOptions, configuration_schema},
    error::{Error, Result},
    handler::DiscordHandler,
    inbound::{BotUserId, InboundRelay},
    outbound::OutboundRelay,
    proxy::{KnownProxies, ProxyIdentityResolver},
    rest::DiscordRest,
    search::{ChannelSearchResponder, GuildDirectory},
    types::NativeEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No configuration record exists yet.
    Unconfigured,
    /// Schema published, waiting for the hub to submit values.
    AwaitingConfig,
    Configured,
    Connecting,
    Running,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unconfigured => "unconfigured",
            Self::AwaitingConfig => "awaiting_config",
            Self::Configured => "configured",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// One bridge instance: configuration bootstrap, the Discord connection and
/// the three consume loops.
pub struct BridgeSession {
    hub: Arc<dyn Hub>,
    options: SessionOptions,
    http: reqwest::Client,
    state: watch::Sender<SessionState>,
}

impl BridgeSession {
    pub fn new(hub: Arc<dyn Hub>, options: SessionOptions) -> Self {
        Self {
            hub,
            options,
            http: reqwest::Client::new(),
            state: watch::Sender::new(SessionState::Unconfigured),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = %prev, to = %next, instance_id = %self.options.instance_id, "session state");
        }
    }

    /// Make sure a configuration record exists, asking the hub for one on
    /// first run, and return it.
    pub async fn bootstrap_config(&self) -> Result<BridgeConfig> {
        let path = self.options.config_path();
        if !BridgeConfig::exists(&path) {
            self.transition(SessionState::Unconfigured);
            self.transition(SessionState::AwaitingConfig);
            let values = self.hub.await_configuration(configuration_schema()).await?;
            BridgeConfig::from_field_values(&values)?.save(&path)?;
            info!(path = %path.display(), "configuration received from hub");
        }
        self.transition(SessionState::Configured);
        BridgeConfig::load(&path)
    }

    /// Run until `cancel` fires, the hub closes its streams, or the Discord
    /// connection fails.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let result = self.run_inner(&cancel).await;
        self.transition(SessionState::Terminated);
        result
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<()> {
        let config = self.bootstrap_config().await?;

        self.transition(SessionState::Connecting);
        let rest = Arc::new(DiscordRest::new(
            self.http.clone(),
            &self.options.api_base,
            config.bot_token.clone(),
        ));
        let known = KnownProxies::new();
        let bot_user_id: BotUserId = Arc::new(OnceCell::new());
        let guilds = GuildDirectory::new();
        let (event_tx, event_rx) = mpsc::channel(self.options.event_queue_capacity);

        let handler = DiscordHandler {
            bot_user_id: Arc::clone(&bot_user_id),
            events: event_tx,
            guilds: guilds.clone(),
        };
        let mut client = Client::builder(config.bot_token.expose_secret(), DiscordHandler::intents())
            .event_handler(handler)
            .await?;
        let shard_manager = client.shard_manager.clone();
        let mut gateway = tokio::spawn(async move { client.start().await });

        let (messages, searches) = match self.subscribe().await {
            Ok(streams) => streams,
            Err(e) => {
                shard_manager.shutdown_all().await;
                gateway.abort();
                return Err(e);
            },
        };

        let resolver = Arc::new(ProxyIdentityResolver::new(rest.clone(), known.clone()));
        let outbound = Arc::new(OutboundRelay::new(
            resolver,
            AttachmentFetcher::new(self.http.clone()),
            self.http.clone(),
            &self.options.api_base,
        ));
        let inbound = InboundRelay::new(Arc::clone(&self.hub), rest, known, bot_user_id);
        let responder = ChannelSearchResponder::new(Arc::clone(&self.hub), guilds);

        let loops = cancel.child_token();
        let mut relays = JoinSet::new();
        relays.spawn(outbound_loop(outbound, messages, loops.clone()));
        relays.spawn(inbound_loop(inbound, event_rx, loops.clone()));
        self.transition(SessionState::Running);

        let outcome = supervise(
            &loops,
            responder.run(searches, loops.clone()),
            &mut gateway,
            &mut relays,
        )
        .await;

        loops.cancel();
        shard_manager.shutdown_all().await;
        if !gateway.is_finished() {
            let _ = gateway.await;
        }
        while let Some(joined) = relays.join_next().await {
            match joined {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!(error = %e, "relay loop ended with error"),
                Err(e) => warn!(error = %e, "relay task failed"),
            }
        }
        outcome
    }

    async fn subscribe(
        &self,
    ) -> Result<(mpsc::Receiver<InboundHubMessage>, mpsc::Receiver<SearchRequest>)> {
        let messages = self.hub.subscribe_messages().await?;
        let searches = self.hub.subscribe_search_requests().await?;
        Ok((messages, searches))
    }
}

/// Wait for the first running piece to stop and turn that into the session
/// outcome. Anything ending before `cancel` fires is a failure, except a
/// gateway that shut down cleanly.
async fn supervise(
    cancel: &CancellationToken,
    search: impl Future<Output = ()>,
    gateway: &mut JoinHandle<serenity::Result<()>>,
    relays: &mut JoinSet<Result<()>>,
) -> Result<()> {
    tokio::select! {
        _ = search => {
            if cancel.is_cancelled() {
                info!("shutdown requested");
                Ok(())
            } else {
                warn!("hub search stream ended");
                Err(Error::Hub(chatplug_hub::Error::SubscriptionClosed))
            }
        },
        joined = gateway => match joined {
            Ok(Ok(())) => {
                warn!("discord gateway stopped");
                Ok(())
            },
            Ok(Err(e)) => Err(Error::Gateway(e)),
            Err(e) => {
                error!(error = %e, "discord gateway task failed");
                Err(Error::Task(e))
            },
        },
        Some(joined) = relays.join_next() => match joined {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "relay task failed");
                Err(Error::Task(e))
            },
        },
    }
}

async fn outbound_loop(
    relay: Arc<OutboundRelay>,
    messages: mpsc::Receiver<InboundHubMessage>,
    cancel: CancellationToken,
) -> Result<()> {
    relay.run(messages, cancel.clone()).await;
    if cancel.is_cancelled() {
        Ok(())
    } else {
        warn!("hub message stream ended");
        Err(Error::Hub(chatplug_hub::Error::SubscriptionClosed))
    }
}

async fn inbound_loop(
    relay: InboundRelay,
    events: mpsc::Receiver<NativeEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    relay.run(events, cancel.clone()).await;
    if cancel.is_cancelled() {
        Ok(())
    } else {
        Err(Error::RelayStopped { relay: "inbound" })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{proxy::tests::FakeDirectory, testing::FakeHub},
    };

    fn idle_gateway() -> JoinHandle<serenity::Result<()>> {
        tokio::spawn(std::future::pending())
    }

    async fn crashed_gateway() -> serenity::Result<()> {
        panic!("shard crashed")
    }

    fn outbound_relay() -> Arc<OutboundRelay> {
        let http = reqwest::Client::new();
        let dir = Arc::new(FakeDirectory::default());
        Arc::new(OutboundRelay::new(
            Arc::new(ProxyIdentityResolver::new(dir, KnownProxies::new())),
            AttachmentFetcher::new(http.clone()),
            http,
            "http://127.0.0.1:1",
        ))
    }

    fn session(hub: FakeHub, dir: &std::path::Path) -> (Arc<FakeHub>, BridgeSession) {
        let hub = Arc::new(hub);
        let mut options = SessionOptions::new("inst-1");
        options.config_dir = dir.to_path_buf();
        (hub.clone(), BridgeSession::new(hub, options))
    }

    #[tokio::test]
    async fn first_run_asks_hub_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let hub = FakeHub::default();
        *hub.config_values.lock().unwrap() = Some(vec!["from-hub".into()]);
        let (hub, session) = session(hub, dir.path());
        let mut states = session.watch_state();

        let config = session.bootstrap_config().await.unwrap();
        assert_eq!(config.bot_token.expose_secret(), "from-hub");
        assert_eq!(session.state(), SessionState::Configured);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SessionState::Configured);

        let schema = hub.published_schema.lock().unwrap().clone().unwrap();
        assert_eq!(schema, configuration_schema());

        let saved = BridgeConfig::load(&dir.path().join("config.inst-1.json")).unwrap();
        assert_eq!(saved.bot_token.expose_secret(), "from-hub");
    }

    #[tokio::test]
    async fn existing_config_skips_hub() {
        let dir = tempfile::tempdir().unwrap();
        BridgeConfig::new("on-disk")
            .save(&dir.path().join("config.inst-1.json"))
            .unwrap();
        let (hub, session) = session(FakeHub::default(), dir.path());

        let config = session.bootstrap_config().await.unwrap();
        assert_eq!(config.bot_token.expose_secret(), "on-disk");
        assert!(hub.published_schema.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_submission_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let hub = FakeHub::default();
        *hub.config_values.lock().unwrap() = Some(vec!["   ".into()]);
        let (_hub, session) = session(hub, dir.path());

        let err = session.bootstrap_config().await.unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
        assert!(err.is_fatal());
        assert!(!dir.path().join("config.inst-1.json").exists());
    }

    #[tokio::test]
    async fn corrupt_config_terminates_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.inst-1.json"), "{}").unwrap();
        let (_hub, session) = session(FakeHub::default(), dir.path());

        let err = session.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn state_names() {
        assert_eq!(SessionState::AwaitingConfig.to_string(), "awaiting_config");
        assert_eq!(SessionState::Running.to_string(), "running");
    }

    #[tokio::test]
    async fn closed_hub_message_stream_stops_session() {
        let cancel = CancellationToken::new();
        let mut gateway = idle_gateway();
        let mut relays = JoinSet::new();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        relays.spawn(outbound_loop(outbound_relay(), rx, cancel.clone()));

        let err = supervise(&cancel, std::future::pending(), &mut gateway, &mut relays)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Hub(chatplug_hub::Error::SubscriptionClosed)
        ));
        gateway.abort();
    }

    #[tokio::test]
    async fn closed_search_stream_stops_session() {
        let cancel = CancellationToken::new();
        let mut gateway = idle_gateway();
        let mut relays = JoinSet::new();

        let err = supervise(&cancel, std::future::ready(()), &mut gateway, &mut relays)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Hub(chatplug_hub::Error::SubscriptionClosed)
        ));
        gateway.abort();
    }

    #[tokio::test]
    async fn cancellation_is_a_clean_stop() {
        let cancel = CancellationToken::new();
        let mut gateway = idle_gateway();
        let mut relays = JoinSet::new();
        let (_tx, rx) = mpsc::channel(1);
        relays.spawn(outbound_loop(outbound_relay(), rx, cancel.clone()));
        cancel.cancel();

        let search = {
            let cancel = cancel.clone();
            async move { cancel.cancelled().await }
        };
        supervise(&cancel, search, &mut gateway, &mut relays)
            .await
            .unwrap();
        gateway.abort();
    }

    #[tokio::test]
    async fn gateway_panic_is_an_error() {
        let cancel = CancellationToken::new();
        let mut gateway = tokio::spawn(crashed_gateway());
        let mut relays: JoinSet<Result<()>> = JoinSet::new();

        let err = supervise(&cancel, std::future::pending(), &mut gateway, &mut relays)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Task(ref e) if e.is_panic()));
    }
}

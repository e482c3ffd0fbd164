//! Discord → hub relay with loop suppression.

use std::sync::Arc;

use {
    chatplug_hub::{AttachmentRef, ForwardedMessage, Hub},
    tokio::sync::{OnceCell, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    proxy::{KnownProxies, ProxyDirectory},
    types::NativeEvent,
};

/// The bot's own user id, filled in once the gateway reports ready.
pub type BotUserId = Arc<OnceCell<String>>;

/// What to do with a native event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Posted by the bot account itself.
    SelfAuthored,
    /// Posted through one of the bridge's own webhooks.
    BridgeEcho,
    Forward,
}

pub struct InboundRelay {
    hub: Arc<dyn Hub>,
    directory: Arc<dyn ProxyDirectory>,
    known: KnownProxies,
    bot_user_id: BotUserId,
}

impl InboundRelay {
    pub fn new(
        hub: Arc<dyn Hub>,
        directory: Arc<dyn ProxyDirectory>,
        known: KnownProxies,
        bot_user_id: BotUserId,
    ) -> Self {
        Self {
            hub,
            directory,
            known,
            bot_user_id,
        }
    }

    pub async fn classify(&self, event: &NativeEvent) -> Disposition {
        if self
            .bot_user_id
            .get()
            .is_some_and(|id| *id == event.author_id)
        {
            return Disposition::SelfAuthored;
        }

        let Some(proxy_id) = event.proxy_id.as_deref() else {
            return Disposition::Forward;
        };
        if self.known.contains(proxy_id) {
            return Disposition::BridgeEcho;
        }
        match self.directory.proxy(proxy_id).await {
            Ok(hook) if hook.is_bridge_owned() => {
                self.known.insert(proxy_id);
                Disposition::BridgeEcho
            },
            Ok(_) => Disposition::Forward,
            Err(e) => {
                debug!(proxy_id, error = %e, "could not look up webhook, forwarding");
                Disposition::Forward
            },
        }
    }

    /// Forward one native event to the hub unless it originated from the
    /// bridge. Returns whether anything was sent.
    pub async fn handle(&self, event: NativeEvent) -> Result<bool> {
        let disposition = self.classify(&event).await;
        if disposition != Disposition::Forward {
            debug!(
                message_id = %event.message_id,
                ?disposition,
                "suppressing native event"
            );
            return Ok(false);
        }

        let message_id = event.message_id.clone();
        self.hub
            .send_message(forwarded(event))
            .await
            .map_err(|source| Error::ForwardToHubFailed { message_id, source })?;
        Ok(true)
    }

    /// Drain native events until the queue closes or `cancel` fires.
    pub async fn run(self, mut events: mpsc::Receiver<NativeEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("native event queue closed");
                        break;
                    },
                },
            };
            if let Err(e) = self.handle(event).await {
                warn!(error = %e, "dropping native event");
            }
        }
    }
}

fn forwarded(event: NativeEvent) -> ForwardedMessage {
    let attachments = event
        .attachments
        .into_iter()
        .map(|att| AttachmentRef {
            origin_id: Some(att.id),
            ..AttachmentRef::image(att.url)
        })
        .collect();

    ForwardedMessage {
        content: event.content,
        origin_message_id: event.message_id,
        origin_channel_id: event.channel_id,
        author_username: event.author_username,
        author_origin_id: event.author_id,
        author_avatar_url: event.author_avatar_url,
        attachments,
    }
}

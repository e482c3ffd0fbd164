//! Hub → Discord relay through per-channel webhooks.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    chatplug_hub::InboundHubMessage,
    reqwest::multipart::{Form, Part},
    secrecy::ExposeSecret,
    serde::Serialize,
    tokio::{
        sync::mpsc::{self, error::SendError},
        task::JoinSet,
        time::MissedTickBehavior,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    attachment::{AttachmentFetcher, attachment_basename},
    error::{Error, Result},
    proxy::ProxyIdentityResolver,
    types::ProxyIdentity,
};

/// How often lanes with no queued work are closed.
const LANE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// JSON envelope carried in the `payload_json` form field.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
    username: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    avatar_url: &'a str,
}

/// Sending half of one channel's queue.
struct Lane {
    tx: mpsc::UnboundedSender<InboundHubMessage>,
    /// Messages handed to the lane and not yet relayed.
    pending: Arc<AtomicUsize>,
}

/// Receiving half, drained by the lane's task.
struct LaneReceiver {
    rx: mpsc::UnboundedReceiver<InboundHubMessage>,
    pending: Arc<AtomicUsize>,
}

impl Lane {
    fn open(channel_id: &str, spawn: &mut impl FnMut(&str, LaneReceiver)) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        spawn(channel_id, LaneReceiver {
            rx,
            pending: Arc::clone(&pending),
        });
        Self { tx, pending }
    }
}

#[derive(Default)]
struct Lanes {
    lanes: HashMap<String, Lane>,
}

impl Lanes {
    /// Queue `message` on its channel's lane, calling `spawn` to start a
    /// drain task whenever a lane has to be opened.
    fn dispatch(
        &mut self,
        mut message: InboundHubMessage,
        mut spawn: impl FnMut(&str, LaneReceiver),
    ) {
        let channel_id = message.target_channel_id.clone();
        for _ in 0..2 {
            let lane = self
                .lanes
                .entry(channel_id.clone())
                .or_insert_with(|| Lane::open(&channel_id, &mut spawn));
            lane.pending.fetch_add(1, Ordering::AcqRel);
            match lane.tx.send(message) {
                Ok(()) => return,
                Err(SendError(returned)) => {
                    warn!(channel_id = %channel_id, "outbound lane gone, reopening");
                    self.lanes.remove(&channel_id);
                    message = returned;
                },
            }
        }
        warn!(channel_id = %channel_id, "no outbound lane available, dropping message");
    }

    /// Close every lane with nothing queued or in flight, returning how many
    /// were closed. A later message for the channel opens a fresh lane.
    fn sweep(&mut self) -> usize {
        let before = self.lanes.len();
        self.lanes
            .retain(|_, lane| lane.pending.load(Ordering::Acquire) > 0);
        before - self.lanes.len()
    }
}

pub struct OutboundRelay {
    resolver: Arc<ProxyIdentityResolver>,
    fetcher: AttachmentFetcher,
    http: reqwest::Client,
    api_base: String,
    lane_sweep: Duration,
}

impl OutboundRelay {
    pub fn new(
        resolver: Arc<ProxyIdentityResolver>,
        fetcher: AttachmentFetcher,
        http: reqwest::Client,
        api_base: &str,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            lane_sweep: LANE_SWEEP_INTERVAL,
        }
    }

    fn execute_url(&self, proxy: &ProxyIdentity) -> String {
        format!(
            "{}/webhooks/{}/{}",
            self.api_base,
            proxy.proxy_id,
            proxy.proxy_token.expose_secret()
        )
    }

    /// Post one hub message into its target channel.
    ///
    /// Attachments that cannot be fetched are left out; the message is still
    /// sent with whatever remains.
    pub async fn relay(&self, message: &InboundHubMessage) -> Result<()> {
        let proxy = self.resolver.resolve(&message.target_channel_id).await?;

        let payload = WebhookPayload {
            content: &message.body,
            username: &message.author.username,
            avatar_url: &message.author.avatar_url,
        };
        let mut form = Form::new().text("payload_json", serde_json::to_string(&payload)?);

        for attachment in &message.attachments {
            let mut buf = Vec::new();
            match self.fetcher.fetch(&attachment.source_url, &mut buf).await {
                Ok(_) => {
                    let name = attachment_basename(&attachment.source_url);
                    form = form.part(name.clone(), Part::bytes(buf).file_name(name));
                },
                Err(e) => {
                    warn!(
                        channel_id = %message.target_channel_id,
                        url = %attachment.source_url,
                        error = %e,
                        "skipping attachment"
                    );
                },
            }
        }

        let resp = self
            .http
            .post(self.execute_url(&proxy))
            .multipart(form)
            .send()
            .await?;
        let status = resp.status();
        if matches!(status.as_u16(), 200 | 204) {
            debug!(
                channel_id = %message.target_channel_id,
                proxy_id = %proxy.proxy_id,
                "message relayed"
            );
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(Error::UploadRequestFailed {
            status: status.as_u16(),
            body,
        })
    }

    /// Consume hub messages until the stream ends or `cancel` fires.
    ///
    /// Each target channel gets its own lane so order holds within a channel
    /// while a slow channel never holds up the others. Idle lanes are closed
    /// periodically.
    pub async fn run(
        self: Arc<Self>,
        mut messages: mpsc::Receiver<InboundHubMessage>,
        cancel: CancellationToken,
    ) {
        let mut lanes = Lanes::default();
        let mut tasks = JoinSet::new();
        let mut sweep = tokio::time::interval(self.lane_sweep);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = messages.recv() => {
                    let Some(message) = next else {
                        info!("hub message stream closed");
                        break;
                    };
                    lanes.dispatch(message, |channel_id, lane| {
                        tasks.spawn(Arc::clone(&self).drain_lane(channel_id.to_string(), lane));
                    });
                },
                _ = sweep.tick() => {
                    let closed = lanes.sweep();
                    if closed > 0 {
                        debug!(closed, "closed idle outbound lanes");
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "outbound lane task failed");
                    }
                },
            }
        }

        // Closing the lanes lets queued messages finish before the tasks exit.
        drop(lanes);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "outbound lane task failed");
            }
        }
    }

    async fn drain_lane(self: Arc<Self>, channel_id: String, mut lane: LaneReceiver) {
        while let Some(message) = lane.rx.recv().await {
            if let Err(e) = self.relay(&message).await {
                warn!(channel_id = %channel_id, error = %e, "failed to relay hub message");
            }
            lane.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

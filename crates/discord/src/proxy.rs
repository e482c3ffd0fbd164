//! Finds or provisions the webhook ("proxy") the bridge posts through for a
//! channel.

use std::sync::Arc;

use {
    async_trait::async_trait,
    dashmap::{DashMap, DashSet},
    secrecy::Secret,
    serde::Deserialize,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    types::{BRIDGE_TAG, DEFAULT_PROXY_AVATAR, ProxyIdentity, is_bridge_name},
};

/// A Discord webhook as returned by the REST API.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Webhook {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

impl Webhook {
    pub fn is_bridge_owned(&self) -> bool {
        self.name.as_deref().is_some_and(is_bridge_name)
    }
}

/// Platform operations needed to look up and create proxies.
#[async_trait]
pub trait ProxyDirectory: Send + Sync {
    /// Webhooks currently attached to a channel, in platform listing order.
    async fn list_proxies(&self, channel_id: &str) -> Result<Vec<Webhook>>;

    /// Current display name of a channel.
    async fn channel_name(&self, channel_id: &str) -> Result<String>;

    async fn create_proxy(&self, channel_id: &str, name: &str, avatar_url: &str)
    -> Result<Webhook>;

    /// Look up a single webhook by id.
    async fn proxy(&self, proxy_id: &str) -> Result<Webhook>;
}

/// Webhook ids known to belong to this bridge.
#[derive(Clone, Default)]
pub struct KnownProxies {
    ids: Arc<DashSet<String>>,
}

impl KnownProxies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, proxy_id: &str) {
        self.ids.insert(proxy_id.to_string());
    }

    pub fn contains(&self, proxy_id: &str) -> bool {
        self.ids.contains(proxy_id)
    }
}

/// Per-channel async mutexes.
#[derive(Clone, Default)]
struct ChannelLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ChannelLocks {
    fn get(&self, channel_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct ProxyIdentityResolver {
    directory: Arc<dyn ProxyDirectory>,
    known: KnownProxies,
    locks: ChannelLocks,
}

impl ProxyIdentityResolver {
    pub fn new(directory: Arc<dyn ProxyDirectory>, known: KnownProxies) -> Self {
        Self {
            directory,
            known,
            locks: ChannelLocks::default(),
        }
    }

    /// Return the bridge's proxy for `channel_id`, creating it on first use.
    ///
    /// Concurrent calls for the same channel are serialized so at most one
    /// bridge-owned webhook is ever created per channel.
    pub async fn resolve(&self, channel_id: &str) -> Result<ProxyIdentity> {
        let lock = self.locks.get(channel_id);
        let _guard = lock.lock().await;

        self.resolve_locked(channel_id)
            .await
            .map_err(|e| Error::ProxyResolutionFailed {
                channel_id: channel_id.to_string(),
                source: Box::new(e),
            })
    }

    async fn resolve_locked(&self, channel_id: &str) -> Result<ProxyIdentity> {
        let mut existing = None;
        for hook in self.directory.list_proxies(channel_id).await? {
            if !hook.is_bridge_owned() {
                continue;
            }
            // Tokens are only returned to the application that created the
            // webhook, so a tagged hook from another install is unusable.
            if hook.token.is_none() {
                warn!(channel_id, proxy_id = %hook.id, "tagged webhook has no token, skipping");
                continue;
            }
            existing = Some(hook);
            break;
        }

        if let Some(hook) = existing {
            debug!(channel_id, proxy_id = %hook.id, "reusing existing proxy");
            return self.identity(channel_id, hook);
        }

        let channel_name = self.directory.channel_name(channel_id).await?;
        let name = format!("{BRIDGE_TAG}{channel_name}");
        let hook = self
            .directory
            .create_proxy(channel_id, &name, DEFAULT_PROXY_AVATAR)
            .await?;
        info!(channel_id, proxy_id = %hook.id, name = %name, "created proxy");
        self.identity(channel_id, hook)
    }

    fn identity(&self, channel_id: &str, hook: Webhook) -> Result<ProxyIdentity> {
        let token = hook.token.ok_or_else(|| Error::WebhookTokenMissing {
            proxy_id: hook.id.clone(),
        })?;
        self.known.insert(&hook.id);
        Ok(ProxyIdentity {
            channel_id: channel_id.to_string(),
            proxy_id: hook.id,
            proxy_token: Secret::new(token),
            name: hook.name.unwrap_or_default(),
        })
    }
}

//! Minimal Discord REST client for channel and webhook management.

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD},
    reqwest::{RequestBuilder, Response},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, de::DeserializeOwned},
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    proxy::{ProxyDirectory, Webhook},
};

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct DiscordRest {
    http: reqwest::Client,
    api_base: String,
    bot_token: Secret<String>,
}

impl DiscordRest {
    pub fn new(http: reqwest::Client, api_base: &str, bot_token: Secret<String>) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(
            reqwest::header::AUTHORIZATION,
            format!("Bot {}", self.bot_token.expose_secret()),
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.api_base);
        let resp = self.authorized(self.http.get(url)).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    pub async fn channel_webhooks(&self, channel_id: &str) -> Result<Vec<Webhook>> {
        self.get_json(&format!("/channels/{channel_id}/webhooks"))
            .await
    }

    pub async fn channel(&self, channel_id: &str) -> Result<Channel> {
        self.get_json(&format!("/channels/{channel_id}")).await
    }

    pub async fn webhook(&self, webhook_id: &str) -> Result<Webhook> {
        self.get_json(&format!("/webhooks/{webhook_id}")).await
    }

    /// Create a webhook on a channel, using the image at `avatar_url` as its
    /// icon when it can be fetched.
    pub async fn create_webhook(
        &self,
        channel_id: &str,
        name: &str,
        avatar_url: &str,
    ) -> Result<Webhook> {
        let avatar = match self.avatar_data_uri(avatar_url).await {
            Ok(uri) => Some(uri),
            Err(e) => {
                warn!(avatar_url, error = %e, "could not fetch webhook avatar, creating without one");
                None
            },
        };

        let mut body = serde_json::json!({ "name": name });
        if let Some(avatar) = avatar {
            body["avatar"] = serde_json::Value::String(avatar);
        }

        let url = format!("{}/channels/{channel_id}/webhooks", self.api_base);
        let resp = self
            .authorized(self.http.post(url))
            .json(&body)
            .send()
            .await?;
        let hook: Webhook = check(resp).await?.json().await?;
        debug!(channel_id, webhook_id = %hook.id, "webhook created");
        Ok(hook)
    }

    async fn avatar_data_uri(&self, url: &str) -> Result<String> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        let mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| "image/png".into());
        let bytes = resp.bytes().await?;
        Ok(data_uri(&mime, &bytes))
    }
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::PlatformApi {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ProxyDirectory for DiscordRest {
    async fn list_proxies(&self, channel_id: &str) -> Result<Vec<Webhook>> {
        self.channel_webhooks(channel_id).await
    }

    async fn channel_name(&self, channel_id: &str) -> Result<String> {
        Ok(self.channel(channel_id).await?.name.unwrap_or_default())
    }

    async fn create_proxy(
        &self,
        channel_id: &str,
        name: &str,
        avatar_url: &str,
    ) -> Result<Webhook> {
        self.create_webhook(channel_id, name, avatar_url).await
    }

    async fn proxy(&self, proxy_id: &str) -> Result<Webhook> {
        self.webhook(proxy_id).await
    }
}

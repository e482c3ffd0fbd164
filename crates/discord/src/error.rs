use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No configuration record exists for this instance.
    #[error("configuration missing: {path}")]
    ConfigMissing { path: String },

    /// The configuration record exists but cannot be used.
    #[error("configuration invalid: {message}")]
    ConfigInvalid { message: String },

    #[error("failed to resolve proxy for channel {channel_id}: {source}")]
    ProxyResolutionFailed {
        channel_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("attachment {url} is too large ({size} bytes, limit {limit})")]
    AttachmentTooLarge { url: String, size: u64, limit: u64 },

    #[error("attachment transfer failed for {url}: {reason}")]
    AttachmentTransferFailed { url: String, reason: String },

    #[error("webhook upload rejected ({status}): {body}")]
    UploadRequestFailed { status: u16, body: String },

    #[error("forwarding message {message_id} to hub failed: {source}")]
    ForwardToHubFailed {
        message_id: String,
        #[source]
        source: chatplug_hub::Error,
    },

    /// Discord returned a webhook without the token needed to execute it.
    #[error("webhook {proxy_id} has no token")]
    WebhookTokenMissing { proxy_id: String },

    /// A Discord REST call returned a non-success status.
    #[error("discord API error ({status}): {body}")]
    PlatformApi { status: u16, body: String },

    #[error("discord gateway error: {0}")]
    Gateway(#[from] serenity::Error),

    /// A relay loop stopped while the session was still running.
    #[error("{relay} relay stopped unexpectedly")]
    RelayStopped { relay: &'static str },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Hub(#[from] chatplug_hub::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transfer_failed(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::AttachmentTransferFailed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error should abort the process rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigMissing { .. } | Self::ConfigInvalid { .. } | Self::Gateway(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The hub answered with a non-empty `errors` array.
    #[error("hub GraphQL error: {message}")]
    GraphQl { message: String },

    /// The hub broke the subscription protocol.
    #[error("hub protocol error: {message}")]
    Protocol { message: String },

    #[error("hub subscription closed")]
    SubscriptionClosed,
}

impl Error {
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

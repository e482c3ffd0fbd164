//! ChatPlug hub protocol for service bridges.
//!
//! Defines the message shapes exchanged with the hub, the [`Hub`] trait that
//! bridge engines are written against, and [`GraphqlHub`], the concrete client
//! speaking GraphQL over HTTP (mutations) and WebSocket (subscriptions).

pub mod error;
pub mod graphql;
pub mod types;

use {async_trait::async_trait, tokio::sync::mpsc};

pub use {
    error::{Error, Result},
    graphql::GraphqlHub,
    types::{
        AttachmentKind, AttachmentRef, ConfigurationField, ForwardedMessage, HubAuthor,
        InboundHubMessage, SearchRequest, SearchResult,
    },
};

/// Connection to the ChatPlug hub for a single service instance.
#[async_trait]
pub trait Hub: Send + Sync {
    /// Stream of messages the hub wants delivered to the platform.
    async fn subscribe_messages(&self) -> Result<mpsc::Receiver<InboundHubMessage>>;

    /// Stream of channel search queries issued by hub users.
    async fn subscribe_search_requests(&self) -> Result<mpsc::Receiver<SearchRequest>>;

    /// Forward a platform-native message into the hub.
    async fn send_message(&self, message: ForwardedMessage) -> Result<()>;

    /// Answer a search query.
    async fn set_search_response(&self, query: &str, results: Vec<SearchResult>) -> Result<()>;

    /// Publish a configuration schema and wait until the hub submits values
    /// for it. Values are returned in schema order.
    async fn await_configuration(&self, fields: Vec<ConfigurationField>) -> Result<Vec<String>>;
}

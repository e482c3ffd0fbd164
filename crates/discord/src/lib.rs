//! Discord service bridge for the ChatPlug hub.
//!
//! Relays hub messages into Discord channels through per-channel webhooks,
//! forwards native Discord messages back to the hub without echoing the
//! bridge's own posts, and answers hub channel searches.

pub mod attachment;
pub mod config;
pub mod error;
pub mod handler;
pub mod inbound;
pub mod outbound;
pub mod proxy;
pub mod rest;
pub mod search;
pub mod session;
pub mod types;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod testing;

pub use {
    attachment::{AttachmentFetcher, MAX_ATTACHMENT_BYTES},
    config::{BridgeConfig, SessionOptions, configuration_schema},
    error::{Error, Result},
    inbound::{Disposition, InboundRelay},
    outbound::OutboundRelay,
    proxy::{KnownProxies, ProxyDirectory, ProxyIdentityResolver, Webhook},
    rest::DiscordRest,
    search::{ChannelSearchResponder, GuildDirectory},
    session::{BridgeSession, SessionState},
    types::{BRIDGE_TAG, NativeAttachment, NativeEvent, ProxyIdentity},
};

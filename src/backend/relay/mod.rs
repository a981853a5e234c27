//! Relay backends
//!
//! A relay keeps handlers in a local [`SubscriptionDirectory`] and uses an
//! external transport only to move messages between processes:
//!
//! ```text
//!  broadcast(topic, msg)                                 peer instances
//!        │                                                     ▲
//!        ▼                                                     │
//!  encode {topic, message} ──► ChannelPublisher ──► prefix+topic channel
//!                                                              │
//!  directory.broadcast ◄── decode ◄── listener task ◄── ChannelListener
//! ```
//!
//! Publishing always goes through the transport, so the publishing process
//! receives its own message back on the same path as every peer. Local and
//! remote delivery share one dispatch mechanism.
//!
//! The transport is split into two independently connected halves, a
//! [`ChannelPublisher`] and a [`ChannelListener`]. The listener is owned by a
//! single background task (see `listener.rs`) that also applies channel
//! registration changes, so registrations and receives never contend for the
//! connection.
//!
//! [`SubscriptionDirectory`]: crate::directory::SubscriptionDirectory

mod broker;
mod engine;
pub mod envelope;
mod listener;
pub mod loopback;
pub mod postgres;
pub mod redis;
mod transactional;

use async_trait::async_trait;

use crate::utils::error::PubSubError;

pub use broker::BrokerRelay;
pub use loopback::{LoopbackNetwork, LoopbackStats};
pub use transactional::{MAX_CHANNEL_BYTES, NOTIFY_PAYLOAD_LIMIT, TransactionalRelay};

/// A raw payload received on an external channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub channel: String,
    pub payload: String,
}

/// Opens the two connections a relay needs. Called on every `start()`.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect_publisher(&self) -> Result<Box<dyn ChannelPublisher>, PubSubError>;
    async fn connect_listener(&self) -> Result<Box<dyn ChannelListener>, PubSubError>;
}

#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError>;

    /// Release the connection. Called once from `stop()`.
    async fn close(&self) {}
}

#[async_trait]
pub trait ChannelListener: Send {
    async fn listen(&mut self, channel: &str) -> Result<(), PubSubError>;
    async fn unlisten(&mut self, channel: &str) -> Result<(), PubSubError>;

    /// Wait for the next payload on any registered channel.
    ///
    /// Must be cancel-safe: it is raced against commands and shutdown in a
    /// `select!`. `Ok(None)` means the connection is gone for good; errors
    /// are treated as transient.
    async fn recv(&mut self) -> Result<Option<Inbound>, PubSubError>;
}

/// Transport limits checked before anything is sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelRules {
    /// Payloads must be strictly shorter than this many bytes.
    pub payload_limit: Option<usize>,
    pub max_channel_bytes: Option<usize>,
}

#[cfg(test)]
mod tests;

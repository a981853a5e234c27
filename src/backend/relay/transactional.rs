use std::sync::Arc;

use async_trait::async_trait;

use super::engine::RelayEngine;
use super::postgres::PostgresConnector;
use super::{ChannelRules, RelayConnector};
use crate::backend::PubSubBackend;
use crate::directory::{Handler, Message, SubscriptionDirectory};
use crate::utils::error::PubSubError;

/// PostgreSQL rejects `NOTIFY` payloads of this many bytes or more, so the
/// largest envelope that can be sent is one byte shorter.
pub const NOTIFY_PAYLOAD_LIMIT: usize = 8000;

/// Longest channel name PostgreSQL accepts (its identifier limit).
pub const MAX_CHANNEL_BYTES: usize = 63;

/// Relay over a database's notification mechanism (PostgreSQL `NOTIFY` /
/// `LISTEN`).
///
/// Broadcasts whose envelope reaches the payload limit are rejected with
/// [`PubSubError::PayloadTooLarge`] before anything is sent, and topics
/// whose channel would exceed [`MAX_CHANNEL_BYTES`] are rejected with
/// [`PubSubError::InvalidChannel`].
pub struct TransactionalRelay {
    engine: RelayEngine,
}

impl TransactionalRelay {
    /// Relay over the PostgreSQL database at `dsn`. The DSN is validated
    /// here; no connection is made until `start()`.
    pub fn postgres(dsn: &str, prefix: impl Into<String>) -> Result<Self, PubSubError> {
        Self::with_connector(PostgresConnector::new(dsn)?, prefix)
    }

    pub fn with_connector(
        connector: impl RelayConnector + 'static,
        prefix: impl Into<String>,
    ) -> Result<Self, PubSubError> {
        let engine = RelayEngine::new(
            "transactional",
            Box::new(connector),
            prefix.into(),
            ChannelRules {
                payload_limit: Some(NOTIFY_PAYLOAD_LIMIT),
                max_channel_bytes: Some(MAX_CHANNEL_BYTES),
            },
        )?;
        Ok(Self { engine })
    }

    /// Lower (or raise) the payload ceiling, e.g. for a server built with a
    /// different block size. Envelopes of `limit` bytes or more are rejected.
    pub fn with_payload_limit(mut self, limit: usize) -> Self {
        let rules = ChannelRules {
            payload_limit: Some(limit),
            ..self.engine.rules()
        };
        self.engine.set_rules(rules);
        self
    }

    pub fn payload_limit(&self) -> usize {
        self.engine
            .rules()
            .payload_limit
            .unwrap_or(NOTIFY_PAYLOAD_LIMIT)
    }

    pub fn directory(&self) -> &Arc<SubscriptionDirectory> {
        self.engine.directory()
    }

    pub fn prefix(&self) -> &str {
        self.engine.prefix()
    }

    pub fn channel_for(&self, topic: &str) -> String {
        self.engine.channel_for(topic)
    }

    pub async fn is_running(&self) -> bool {
        self.engine.is_running().await
    }
}

#[async_trait]
impl PubSubBackend for TransactionalRelay {
    async fn subscribe_topic(
        &self,
        session_id: &str,
        topic: &str,
        handler: Handler,
    ) -> Result<(), PubSubError> {
        self.engine.subscribe_topic(session_id, topic, handler).await
    }

    async fn unsubscribe_topic(&self, session_id: &str, topic: &str) -> Result<(), PubSubError> {
        self.engine.unsubscribe_topic(session_id, topic).await
    }

    async fn unsubscribe_all(&self, session_id: &str) -> Result<(), PubSubError> {
        self.engine.unsubscribe_all(session_id).await
    }

    async fn broadcast(&self, topic: &str, message: Message) -> Result<(), PubSubError> {
        self.engine.broadcast(topic, message).await
    }

    async fn start(&self) -> Result<(), PubSubError> {
        self.engine.start().await
    }

    async fn stop(&self) -> Result<(), PubSubError> {
        self.engine.stop().await
    }
}

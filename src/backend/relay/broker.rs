use std::sync::Arc;

use async_trait::async_trait;

use super::engine::RelayEngine;
use super::redis::RedisConnector;
use super::{ChannelRules, RelayConnector};
use crate::backend::PubSubBackend;
use crate::directory::{Handler, Message, SubscriptionDirectory};
use crate::utils::error::PubSubError;

/// Relay over a message broker's channel pub/sub (Redis `PUBLISH` /
/// `SUBSCRIBE`).
///
/// Every process using the same broker and prefix sees every broadcast,
/// its own included.
pub struct BrokerRelay {
    engine: RelayEngine,
}

impl BrokerRelay {
    /// Relay over the Redis server at `url`. No connection is made until
    /// `start()`.
    pub fn redis(url: &str, prefix: impl Into<String>) -> Result<Self, PubSubError> {
        Self::with_connector(RedisConnector::new(url)?, prefix)
    }

    /// Relay over any transport, e.g. a [`LoopbackNetwork`] in tests.
    ///
    /// [`LoopbackNetwork`]: super::LoopbackNetwork
    pub fn with_connector(
        connector: impl RelayConnector + 'static,
        prefix: impl Into<String>,
    ) -> Result<Self, PubSubError> {
        let engine = RelayEngine::new(
            "broker",
            Box::new(connector),
            prefix.into(),
            ChannelRules::default(),
        )?;
        Ok(Self { engine })
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
impl PubSubBackend for BrokerRelay {
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

//! In-process backend
//!
//! Suitable for single-instance deployments: messages never leave the
//! process. Every operation delegates to a [`SubscriptionDirectory`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{Lifecycle, PubSubBackend};
use crate::directory::{Handler, Message, SubscriptionDirectory};
use crate::utils::error::PubSubError;

#[derive(Debug, Default)]
pub struct MemoryPubSub {
    directory: Arc<SubscriptionDirectory>,
    lifecycle: Lifecycle,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directory(&self) -> &Arc<SubscriptionDirectory> {
        &self.directory
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

#[async_trait]
impl PubSubBackend for MemoryPubSub {
    async fn subscribe_topic(
        &self,
        session_id: &str,
        topic: &str,
        handler: Handler,
    ) -> Result<(), PubSubError> {
        self.lifecycle.ensure_running("subscribe_topic")?;
        self.directory.subscribe(session_id, topic, handler);
        Ok(())
    }

    async fn unsubscribe_topic(&self, session_id: &str, topic: &str) -> Result<(), PubSubError> {
        self.lifecycle.ensure_running("unsubscribe_topic")?;
        self.directory.unsubscribe(session_id, topic);
        Ok(())
    }

    async fn unsubscribe_all(&self, session_id: &str) -> Result<(), PubSubError> {
        self.lifecycle.ensure_running("unsubscribe_all")?;
        self.directory.unsubscribe_all(session_id);
        Ok(())
    }

    async fn broadcast(&self, topic: &str, message: Message) -> Result<(), PubSubError> {
        self.lifecycle.ensure_running("broadcast")?;
        self.directory.broadcast(topic, message);
        Ok(())
    }

    async fn start(&self) -> Result<(), PubSubError> {
        self.lifecycle.start()?;
        info!("in-memory pub/sub started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), PubSubError> {
        self.lifecycle.stop()?;
        info!("in-memory pub/sub stopped");
        Ok(())
    }
}

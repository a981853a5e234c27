//! Redis transport for [`BrokerRelay`](super::BrokerRelay).
//!
//! Publishing goes through a `ConnectionManager`, which reconnects on its
//! own. Listening uses a dedicated pub/sub connection because a Redis
//! connection in subscriber mode cannot issue ordinary commands.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, PubSub};
use tracing::warn;

use super::{ChannelListener, ChannelPublisher, Inbound, RelayConnector};
use crate::utils::error::PubSubError;

pub struct RedisConnector {
    client: redis::Client,
}

impl RedisConnector {
    /// Parses `url` without connecting.
    pub fn new(url: &str) -> Result<Self, PubSubError> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl RelayConnector for RedisConnector {
    async fn connect_publisher(&self) -> Result<Box<dyn ChannelPublisher>, PubSubError> {
        let conn = ConnectionManager::new(self.client.clone()).await?;
        Ok(Box::new(RedisPublisher { conn }))
    }

    async fn connect_listener(&self) -> Result<Box<dyn ChannelListener>, PubSubError> {
        let pubsub = self.client.get_async_pubsub().await?;
        Ok(Box::new(RedisChannelListener { pubsub }))
    }
}

struct RedisPublisher {
    conn: ConnectionManager,
}

#[async_trait]
impl ChannelPublisher for RedisPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }
}

struct RedisChannelListener {
    pubsub: PubSub,
}

#[async_trait]
impl ChannelListener for RedisChannelListener {
    async fn listen(&mut self, channel: &str) -> Result<(), PubSubError> {
        self.pubsub.subscribe(channel).await?;
        Ok(())
    }

    async fn unlisten(&mut self, channel: &str) -> Result<(), PubSubError> {
        self.pubsub.unsubscribe(channel).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Inbound>, PubSubError> {
        loop {
            let mut messages = std::pin::pin!(self.pubsub.on_message());
            let Some(msg) = messages.next().await else {
                return Ok(None);
            };
            match msg.get_payload::<String>() {
                Ok(payload) => {
                    return Ok(Some(Inbound {
                        channel: msg.get_channel_name().to_string(),
                        payload,
                    }));
                }
                Err(e) => {
                    warn!(channel = msg.get_channel_name(), error = %e, "skipping non-text redis payload")
                }
            }
        }
    }
}

//! PostgreSQL transport for [`TransactionalRelay`](super::TransactionalRelay).
//!
//! Publishing runs `SELECT pg_notify($1, $2)` on a one-connection pool.
//! Listening uses sqlx's `PgListener`, which re-issues its `LISTEN`s after
//! reconnecting. Notifications sent while it was disconnected are lost.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgListener, PgPoolOptions};

use super::{ChannelListener, ChannelPublisher, Inbound, RelayConnector};
use crate::utils::error::PubSubError;

pub struct PostgresConnector {
    options: PgConnectOptions,
}

impl PostgresConnector {
    /// Parses `dsn` without connecting.
    pub fn new(dsn: &str) -> Result<Self, PubSubError> {
        Ok(Self {
            options: PgConnectOptions::from_str(dsn)?,
        })
    }

    async fn pool(&self) -> Result<PgPool, PubSubError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(self.options.clone())
            .await?;
        Ok(pool)
    }
}

#[async_trait]
impl RelayConnector for PostgresConnector {
    async fn connect_publisher(&self) -> Result<Box<dyn ChannelPublisher>, PubSubError> {
        Ok(Box::new(PgPublisher {
            pool: self.pool().await?,
        }))
    }

    async fn connect_listener(&self) -> Result<Box<dyn ChannelListener>, PubSubError> {
        let pool = self.pool().await?;
        let listener = PgListener::connect_with(&pool).await?;
        Ok(Box::new(PgChannelListener { listener }))
    }
}

struct PgPublisher {
    pool: PgPool,
}

#[async_trait]
impl ChannelPublisher for PgPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

struct PgChannelListener {
    listener: PgListener,
}

#[async_trait]
impl ChannelListener for PgChannelListener {
    async fn listen(&mut self, channel: &str) -> Result<(), PubSubError> {
        self.listener.listen(channel).await?;
        Ok(())
    }

    async fn unlisten(&mut self, channel: &str) -> Result<(), PubSubError> {
        self.listener.unlisten(channel).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Inbound>, PubSubError> {
        match self.listener.try_recv().await? {
            Some(notification) => Ok(Some(Inbound {
                channel: notification.channel().to_string(),
                payload: notification.payload().to_string(),
            })),
            // The next call reconnects and re-listens.
            None => Err(PubSubError::Transport(
                "postgres listener connection lost".to_string(),
            )),
        }
    }
}

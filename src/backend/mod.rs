//! Backend contract
//!
//! `PubSubBackend` is the complete surface the UI layer talks to: two
//! lifecycle calls and four data operations. Every implementation in this
//! crate is substitutable for any other; which one runs is decided where the
//! backend is constructed (see [`from_settings`]).
//!
//! Implementations:
//! - [`MemoryPubSub`]: single process, delivery stays local
//! - [`BrokerRelay`]: fans out through a shared broker (Redis pub/sub)
//! - [`TransactionalRelay`]: fans out through PostgreSQL `NOTIFY`/`LISTEN`
//! - [`crate::testing::RecordingPubSub`]: synchronous, records every call
//!
//! Lifecycle: a backend starts `Stopped`. The data operations are valid only
//! between `start()` and `stop()`; outside that window they return
//! [`PubSubError::NotRunning`].

mod lifecycle;
pub mod memory;
pub mod relay;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BackendKind, PubSubSettings};
use crate::directory::{Handler, Message};
use crate::utils::error::PubSubError;

pub(crate) use lifecycle::Lifecycle;
pub use memory::MemoryPubSub;
pub use relay::{BrokerRelay, LoopbackNetwork, TransactionalRelay};

#[async_trait]
pub trait PubSubBackend: Send + Sync {
    /// Subscribe `session_id` to `topic`. Subscribing again replaces the handler.
    async fn subscribe_topic(
        &self,
        session_id: &str,
        topic: &str,
        handler: Handler,
    ) -> Result<(), PubSubError>;

    /// Remove one subscription. Unknown subscriptions are ignored.
    async fn unsubscribe_topic(&self, session_id: &str, topic: &str) -> Result<(), PubSubError>;

    /// Remove every subscription held by a session (called on disconnect).
    async fn unsubscribe_all(&self, session_id: &str) -> Result<(), PubSubError>;

    /// Deliver `message` to every subscriber of `topic`, wherever it lives.
    ///
    /// Relays require `message` to survive a `serde_json` round trip.
    async fn broadcast(&self, topic: &str, message: Message) -> Result<(), PubSubError>;

    /// Called once when the application starts.
    async fn start(&self) -> Result<(), PubSubError>;

    /// Called once when the application shuts down.
    async fn stop(&self) -> Result<(), PubSubError>;
}

/// Build the backend selected in configuration. The backend is returned
/// stopped; the caller owns `start()`/`stop()`.
pub fn from_settings(settings: &PubSubSettings) -> Result<Arc<dyn PubSubBackend>, PubSubError> {
    let backend: Arc<dyn PubSubBackend> = match settings.backend {
        BackendKind::Memory => Arc::new(MemoryPubSub::new()),
        BackendKind::Redis => Arc::new(BrokerRelay::redis(
            &settings.redis_url,
            settings.channel_prefix.clone(),
        )?),
        BackendKind::Postgres => Arc::new(
            TransactionalRelay::postgres(&settings.postgres_dsn, settings.channel_prefix.clone())?
                .with_payload_limit(settings.notify_payload_limit),
        ),
    };
    Ok(backend)
}

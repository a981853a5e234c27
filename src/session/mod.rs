//! The `session` module binds one connected client's identity to a backend.
//!
//! A `SessionPubSub` is created when a client connects and closed when it
//! disconnects. It holds no state of its own: every call forwards to the
//! backend with the bound session id filled in.

use std::sync::Arc;

use tracing::debug;

use crate::backend::PubSubBackend;
use crate::directory::{Handler, Message, SessionId};
use crate::utils::error::PubSubError;

pub struct SessionPubSub<B: PubSubBackend + ?Sized = dyn PubSubBackend> {
    backend: Arc<B>,
    session_id: SessionId,
}

impl<B: PubSubBackend + ?Sized> SessionPubSub<B> {
    pub fn new(backend: Arc<B>, session_id: impl Into<SessionId>) -> Self {
        Self {
            backend,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub async fn subscribe(&self, topic: &str, handler: Handler) -> Result<(), PubSubError> {
        self.backend
            .subscribe_topic(&self.session_id, topic, handler)
            .await
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), PubSubError> {
        self.backend.unsubscribe_topic(&self.session_id, topic).await
    }

    pub async fn unsubscribe_all(&self) -> Result<(), PubSubError> {
        self.backend.unsubscribe_all(&self.session_id).await
    }

    /// Broadcasts are not session scoped; every subscriber of `topic` is
    /// reached, this session's own subscription included.
    pub async fn broadcast(&self, topic: &str, message: Message) -> Result<(), PubSubError> {
        self.backend.broadcast(topic, message).await
    }

    /// Drop every subscription this session holds and discard the scope.
    pub async fn close(self) -> Result<(), PubSubError> {
        debug!(session = %self.session_id, "closing session");
        self.backend.unsubscribe_all(&self.session_id).await
    }
}

impl<B: PubSubBackend + ?Sized> std::fmt::Debug for SessionPubSub<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPubSub")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

//! Subscription directory
//!
//! The directory is the in-process leaf every backend builds on. It is
//! responsible for:
//! - keeping the (session, topic, handler) relation in two synchronized
//!   indexes (see `index.rs`)
//! - serializing mutation behind a single lock
//! - dispatching a broadcast to the handlers of a topic
//!
//! Concurrency and usage notes:
//! - The lock is held only for the synchronous index update. `broadcast`
//!   snapshots the handler list under the lock, releases it, and only then
//!   spawns the handlers. A handler may therefore call back into the
//!   directory (subscribe, unsubscribe) without deadlocking, and a slow
//!   handler never blocks other directory operations.
//! - Because the snapshot is taken under the same lock as removals, a
//!   broadcast that starts after an unsubscribe has returned never sees the
//!   removed handler.
//! - Handlers run as independent tokio tasks. Errors and panics are logged
//!   per handler and never reach the broadcaster or sibling handlers.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::handler::{Handler, Message, Topic};
use super::index::Indexes;

#[derive(Default)]
pub struct SubscriptionDirectory {
    indexes: Mutex<Indexes>,
}

impl SubscriptionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `session` to `topic`. Re-subscribing replaces the handler.
    ///
    /// Returns true when `topic` had no subscribers before this call.
    pub fn subscribe(&self, session: &str, topic: &str, handler: Handler) -> bool {
        let created = self.indexes.lock().insert(session, topic, handler);
        debug!(session, topic, created, "subscribed");
        created
    }

    /// Unsubscribe `session` from `topic`. Unknown pairs are a no-op.
    ///
    /// Returns true when the topic has no subscribers left afterwards.
    pub fn unsubscribe(&self, session: &str, topic: &str) -> bool {
        let emptied = self.indexes.lock().remove(session, topic);
        debug!(session, topic, emptied, "unsubscribed");
        emptied
    }

    /// Remove every subscription of `session` and return the topics that
    /// were left without subscribers.
    pub fn unsubscribe_all(&self, session: &str) -> Vec<Topic> {
        let emptied = self.indexes.lock().remove_session(session);
        debug!(session, emptied = emptied.len(), "unsubscribed from all topics");
        emptied
    }

    /// Schedule every current handler of `topic` with `message`.
    ///
    /// Returns the number of handlers scheduled; it does not wait for them.
    pub fn broadcast(&self, topic: &str, message: Message) -> usize {
        let handlers = self.indexes.lock().handlers(topic);
        if handlers.is_empty() {
            debug!(topic, "no local subscribers");
            return 0;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(topic, error = %e, "broadcast outside of a tokio runtime; dropping message");
                return 0;
            }
        };

        let count = handlers.len();
        for handler in handlers {
            let topic = topic.to_string();
            let message = message.clone();
            runtime.spawn(invoke(handler, topic, message));
        }
        count
    }

    /// The handler currently registered for `(session, topic)`.
    pub fn handler(&self, session: &str, topic: &str) -> Option<Handler> {
        self.indexes.lock().handler(session, topic)
    }

    /// Topics that currently have at least one subscriber.
    pub fn topics(&self) -> Vec<Topic> {
        self.indexes.lock().topics()
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.indexes.lock().has_topic(topic)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.indexes.lock().subscriber_count(topic)
    }

    pub fn topics_for(&self, session: &str) -> Vec<Topic> {
        self.indexes.lock().topics_for(session)
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.lock().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        self.indexes.lock().assert_consistent();
    }
}

impl std::fmt::Debug for SubscriptionDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionDirectory")
            .field("topics", &self.topics())
            .finish()
    }
}

/// Run one handler, containing both returned errors and panics.
pub(crate) async fn invoke(handler: Handler, topic: Topic, message: Message) {
    let call = AssertUnwindSafe(async { handler(topic.clone(), message).await });
    match call.catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%topic, error = %e, "handler failed"),
        Err(_) => error!(%topic, "handler panicked"),
    }
}

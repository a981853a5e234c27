//! Deterministic test double
//!
//! `RecordingPubSub` satisfies the backend contract with fully synchronous
//! dispatch: `broadcast` awaits every current handler before it returns, so
//! a test can assert on effects right after the call. Every call is recorded
//! in order.
//!
//! It does not track the running state. `start()` and `stop()` are counted
//! and the data operations work whether or not `start()` was called.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::backend::PubSubBackend;
use crate::directory::{Handler, Message, SessionId, Topic};
use crate::utils::error::PubSubError;

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Subscribe { session_id: SessionId, topic: Topic },
    Unsubscribe { session_id: SessionId, topic: Topic },
    Broadcast { topic: Topic, message: Message },
}

#[derive(Default)]
pub struct RecordingPubSub {
    handlers: Mutex<HashMap<Topic, HashMap<SessionId, Handler>>>,
    calls: Mutex<Vec<RecordedCall>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl RecordingPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded call, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// `(session_id, topic)` of every `subscribe_topic` call.
    pub fn subscriptions(&self) -> Vec<(SessionId, Topic)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Subscribe { session_id, topic } => {
                    Some((session_id.clone(), topic.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// `(session_id, topic)` of every removal, including one per topic
    /// dropped by `unsubscribe_all`.
    pub fn unsubscriptions(&self) -> Vec<(SessionId, Topic)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Unsubscribe { session_id, topic } => {
                    Some((session_id.clone(), topic.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn broadcasts(&self) -> Vec<(Topic, Message)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Broadcast { topic, message } => {
                    Some((topic.clone(), message.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn has_handler(&self, session_id: &str, topic: &str) -> bool {
        self.handlers
            .lock()
            .get(topic)
            .is_some_and(|sessions| sessions.contains_key(session_id))
    }

    /// How many times `start()` has been called.
    pub fn started(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }

    pub fn stopped(&self) -> usize {
        self.stops.load(Ordering::Relaxed)
    }

    /// Forget the recorded calls and every registered handler.
    pub fn clear(&self) {
        self.calls.lock().clear();
        self.handlers.lock().clear();
    }

    fn record(&self, call: RecordedCall) {
        self.calls.lock().push(call);
    }
}

impl std::fmt::Debug for RecordingPubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingPubSub")
            .field("calls", &self.calls.lock().len())
            .field("topics", &self.handlers.lock().len())
            .finish()
    }
}

#[async_trait]
impl PubSubBackend for RecordingPubSub {
    async fn subscribe_topic(
        &self,
        session_id: &str,
        topic: &str,
        handler: Handler,
    ) -> Result<(), PubSubError> {
        self.handlers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .insert(session_id.to_string(), handler);
        self.record(RecordedCall::Subscribe {
            session_id: session_id.to_string(),
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn unsubscribe_topic(&self, session_id: &str, topic: &str) -> Result<(), PubSubError> {
        {
            let mut handlers = self.handlers.lock();
            if let Some(sessions) = handlers.get_mut(topic) {
                sessions.remove(session_id);
                if sessions.is_empty() {
                    handlers.remove(topic);
                }
            }
        }
        self.record(RecordedCall::Unsubscribe {
            session_id: session_id.to_string(),
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn unsubscribe_all(&self, session_id: &str) -> Result<(), PubSubError> {
        let mut dropped = Vec::new();
        {
            let mut handlers = self.handlers.lock();
            handlers.retain(|topic, sessions| {
                if sessions.remove(session_id).is_some() {
                    dropped.push(topic.clone());
                }
                !sessions.is_empty()
            });
        }
        dropped.sort();
        for topic in dropped {
            self.record(RecordedCall::Unsubscribe {
                session_id: session_id.to_string(),
                topic,
            });
        }
        Ok(())
    }

    async fn broadcast(&self, topic: &str, message: Message) -> Result<(), PubSubError> {
        self.record(RecordedCall::Broadcast {
            topic: topic.to_string(),
            message: message.clone(),
        });

        let targets: Vec<Handler> = self
            .handlers
            .lock()
            .get(topic)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default();

        for handler in targets {
            if let Err(e) = handler(topic.to_string(), message.clone()).await {
                warn!(%topic, error = %e, "handler failed");
            }
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), PubSubError> {
        self.starts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn stop(&self) -> Result<(), PubSubError> {
        self.stops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

//! Subscription indexes
//!
//! `Indexes` holds the same subscription set twice: by topic and by session.
//! Every mutation updates both sides and prunes buckets that become empty, so
//! a topic key exists exactly when somebody is subscribed to it.
//!
//! The type is plain data with no locking; `SubscriptionDirectory` owns it
//! behind a mutex.

use std::collections::HashMap;

use super::handler::{Handler, SessionId, Topic};

#[derive(Default)]
pub(crate) struct Indexes {
    by_topic: HashMap<Topic, HashMap<SessionId, Handler>>,
    by_session: HashMap<SessionId, HashMap<Topic, Handler>>,
}

impl Indexes {
    /// Insert or replace the handler for `(session, topic)`.
    /// Returns true when the topic had no subscribers before.
    pub(crate) fn insert(&mut self, session: &str, topic: &str, handler: Handler) -> bool {
        let created = !self.by_topic.contains_key(topic);

        self.by_topic
            .entry(topic.to_string())
            .or_default()
            .insert(session.to_string(), handler.clone());
        self.by_session
            .entry(session.to_string())
            .or_default()
            .insert(topic.to_string(), handler);

        created
    }

    /// Remove `(session, topic)` if present.
    /// Returns true when this removal left the topic without subscribers.
    pub(crate) fn remove(&mut self, session: &str, topic: &str) -> bool {
        if let Some(topics) = self.by_session.get_mut(session) {
            topics.remove(topic);
            if topics.is_empty() {
                self.by_session.remove(session);
            }
        }

        let Some(sessions) = self.by_topic.get_mut(topic) else {
            return false;
        };
        if sessions.remove(session).is_none() {
            return false;
        }
        if sessions.is_empty() {
            self.by_topic.remove(topic);
            return true;
        }
        false
    }

    /// Drop every subscription held by `session`; returns the topics emptied.
    pub(crate) fn remove_session(&mut self, session: &str) -> Vec<Topic> {
        let Some(topics) = self.by_session.remove(session) else {
            return Vec::new();
        };

        let mut emptied = Vec::new();
        for topic in topics.into_keys() {
            if let Some(sessions) = self.by_topic.get_mut(&topic) {
                sessions.remove(session);
                if sessions.is_empty() {
                    self.by_topic.remove(&topic);
                    emptied.push(topic);
                }
            }
        }
        emptied
    }

    pub(crate) fn handlers(&self, topic: &str) -> Vec<Handler> {
        self.by_topic
            .get(topic)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn handler(&self, session: &str, topic: &str) -> Option<Handler> {
        self.by_session.get(session)?.get(topic).cloned()
    }

    pub(crate) fn topics(&self) -> Vec<Topic> {
        self.by_topic.keys().cloned().collect()
    }

    pub(crate) fn has_topic(&self, topic: &str) -> bool {
        self.by_topic.contains_key(topic)
    }

    pub(crate) fn subscriber_count(&self, topic: &str) -> usize {
        self.by_topic.get(topic).map_or(0, HashMap::len)
    }

    pub(crate) fn topics_for(&self, session: &str) -> Vec<Topic> {
        self.by_session
            .get(session)
            .map(|topics| topics.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_topic.is_empty() && self.by_session.is_empty()
    }

    /// Panics if the two indexes disagree or a bucket is empty.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (topic, sessions) in &self.by_topic {
            assert!(!sessions.is_empty(), "empty topic bucket for {topic}");
            for session in sessions.keys() {
                assert!(
                    self.by_session
                        .get(session)
                        .is_some_and(|topics| topics.contains_key(topic)),
                    "({session}, {topic}) missing from session index"
                );
            }
        }
        for (session, topics) in &self.by_session {
            assert!(!topics.is_empty(), "empty session bucket for {session}");
            for topic in topics.keys() {
                assert!(
                    self.by_topic
                        .get(topic)
                        .is_some_and(|sessions| sessions.contains_key(session)),
                    "({session}, {topic}) missing from topic index"
                );
            }
        }
    }
}

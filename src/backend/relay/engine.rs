//! Shared relay engine
//!
//! `RelayEngine` implements the backend contract once for every relay
//! transport. The public relay types wrap it and differ only in how they
//! connect and which [`ChannelRules`] they enforce.
//!
//! State while running (connections, listener task, its cancellation token)
//! sits behind an async mutex. `start()` holds it while connecting and
//! re-listening to existing topics; `stop()` holds it while taking the
//! state out. Data operations hold it only to clone the handles they need,
//! never across a publish or a channel registration.
//!
//! Every subscribe, every emptying unsubscribe and every rollback is followed
//! by a channel sync. The listener task applies syncs in order against the
//! live directory, so the channel ends up registered exactly when the topic
//! has subscribers, and `subscribe_topic` only returns `Ok` once it is.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::listener::{Command, ListenerTask};
use super::{ChannelPublisher, ChannelRules, RelayConnector, envelope};
use crate::directory::{Handler, Message, SubscriptionDirectory};
use crate::utils::error::PubSubError;

struct Running {
    publisher: Arc<dyn ChannelPublisher>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub(crate) struct RelayEngine {
    backend: &'static str,
    directory: Arc<SubscriptionDirectory>,
    prefix: String,
    rules: ChannelRules,
    connector: Box<dyn RelayConnector>,
    running: Mutex<Option<Running>>,
}

impl RelayEngine {
    pub(crate) fn new(
        backend: &'static str,
        connector: Box<dyn RelayConnector>,
        prefix: String,
        rules: ChannelRules,
    ) -> Result<Self, PubSubError> {
        if prefix.is_empty() {
            return Err(PubSubError::InvalidPrefix);
        }
        Ok(Self {
            backend,
            directory: Arc::new(SubscriptionDirectory::new()),
            prefix,
            rules,
            connector,
            running: Mutex::new(None),
        })
    }

    pub(crate) fn directory(&self) -> &Arc<SubscriptionDirectory> {
        &self.directory
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn rules(&self) -> ChannelRules {
        self.rules
    }

    pub(crate) fn set_rules(&mut self, rules: ChannelRules) {
        self.rules = rules;
    }

    pub(crate) fn channel_for(&self, topic: &str) -> String {
        format!("{}{}", self.prefix, topic)
    }

    pub(crate) async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub(crate) async fn start(&self) -> Result<(), PubSubError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(PubSubError::AlreadyRunning);
        }

        let publisher = self.connector.connect_publisher().await?;
        let listener = self.connector.connect_listener().await?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut task = ListenerTask::new(
            self.backend,
            listener,
            self.directory.clone(),
            self.prefix.clone(),
            command_rx,
            cancel.clone(),
        );
        if let Err(e) = task.listen_existing().await {
            publisher.close().await;
            return Err(e);
        }

        *running = Some(Running {
            publisher: Arc::from(publisher),
            commands,
            cancel,
            task: task.spawn(),
        });
        info!(backend = self.backend, prefix = %self.prefix, "relay pub/sub started");
        Ok(())
    }

    pub(crate) async fn stop(&self) -> Result<(), PubSubError> {
        let Running {
            publisher,
            commands,
            cancel,
            task,
        } = self
            .running
            .lock()
            .await
            .take()
            .ok_or(PubSubError::NotRunning { operation: "stop" })?;

        cancel.cancel();
        drop(commands);
        match task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => debug!(backend = self.backend, "relay listener cancelled"),
            Err(e) => error!(backend = self.backend, error = %e, "relay listener failed during shutdown"),
        }

        publisher.close().await;
        info!(backend = self.backend, "relay pub/sub stopped");
        Ok(())
    }

    pub(crate) async fn subscribe_topic(
        &self,
        session_id: &str,
        topic: &str,
        handler: Handler,
    ) -> Result<(), PubSubError> {
        let commands = self.commands("subscribe_topic").await?;
        self.check_channel(&self.channel_for(topic))?;

        self.directory.subscribe(session_id, topic, handler);
        if let Err(e) = sync_channel(&commands, topic).await {
            self.directory.unsubscribe(session_id, topic);
            // Other sessions may still hold the topic.
            if let Err(resync) = sync_channel(&commands, topic).await {
                warn!(
                    backend = self.backend,
                    %topic,
                    error = %resync,
                    "channel left out of sync after failed subscribe"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    pub(crate) async fn unsubscribe_topic(
        &self,
        session_id: &str,
        topic: &str,
    ) -> Result<(), PubSubError> {
        let commands = self.commands("unsubscribe_topic").await?;
        if self.directory.unsubscribe(session_id, topic) {
            sync_channel(&commands, topic).await?;
        }
        Ok(())
    }

    pub(crate) async fn unsubscribe_all(&self, session_id: &str) -> Result<(), PubSubError> {
        let commands = self.commands("unsubscribe_all").await?;

        // Every emptied topic gets its channel closed even if one fails.
        let mut first_error = None;
        for topic in self.directory.unsubscribe_all(session_id) {
            if let Err(e) = sync_channel(&commands, &topic).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub(crate) async fn broadcast(&self, topic: &str, message: Message) -> Result<(), PubSubError> {
        let publisher = self.publisher("broadcast").await?;
        let channel = self.channel_for(topic);
        self.check_channel(&channel)?;

        let payload = envelope::encode(topic, &message)?;
        if let Some(limit) = self.rules.payload_limit {
            if payload.len() >= limit {
                return Err(PubSubError::PayloadTooLarge {
                    size: payload.len(),
                    limit,
                });
            }
        }

        publisher.publish(&channel, &payload).await?;
        debug!(backend = self.backend, %channel, bytes = payload.len(), "published");
        Ok(())
    }

    fn check_channel(&self, channel: &str) -> Result<(), PubSubError> {
        match self.rules.max_channel_bytes {
            Some(limit) if channel.len() > limit => Err(PubSubError::InvalidChannel {
                channel: channel.to_string(),
                reason: format!("longer than {limit} bytes"),
            }),
            _ => Ok(()),
        }
    }

    async fn commands(
        &self,
        operation: &'static str,
    ) -> Result<mpsc::UnboundedSender<Command>, PubSubError> {
        let running = self.running.lock().await;
        running
            .as_ref()
            .map(|r| r.commands.clone())
            .ok_or(PubSubError::NotRunning { operation })
    }

    async fn publisher(
        &self,
        operation: &'static str,
    ) -> Result<Arc<dyn ChannelPublisher>, PubSubError> {
        let running = self.running.lock().await;
        running
            .as_ref()
            .map(|r| r.publisher.clone())
            .ok_or(PubSubError::NotRunning { operation })
    }
}

/// Ask the listener task to reconcile `topic`'s channel and wait for it.
async fn sync_channel(
    commands: &mpsc::UnboundedSender<Command>,
    topic: &str,
) -> Result<(), PubSubError> {
    let (ack, done) = oneshot::channel();
    commands
        .send(Command::Sync {
            topic: topic.to_string(),
            ack,
        })
        .map_err(|_| PubSubError::ListenerUnavailable)?;
    done.await.map_err(|_| PubSubError::ListenerUnavailable)?
}

//! Relay listener task
//!
//! One task per running relay. It exclusively owns the [`ChannelListener`]
//! and does three things:
//! - applies channel registration commands sent by `subscribe_topic` and
//!   friends, acknowledging each one
//! - receives inbound payloads, decodes the envelope and re-enters it through
//!   the local directory's `broadcast`
//! - stops when its cancellation token fires
//!
//! Commands carry only a topic. The task compares the directory's current
//! state with the channels it is registered on and issues whatever listen or
//! unlisten brings the two in line. Because commands are applied in order
//! against live state, racing first-subscribe and last-unsubscribe calls
//! always settle with the channel open exactly when the topic has local
//! subscribers.
//!
//! Nothing that happens in here is returned to a caller of `broadcast`:
//! malformed payloads and receive errors are logged and the loop continues.
//! The loop only ends on cancellation (expected) or when the listener
//! connection is permanently gone (logged by the supervisor as an error).

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{ChannelListener, Inbound, envelope};
use crate::directory::{SubscriptionDirectory, Topic};
use crate::utils::error::PubSubError;

/// Pause after a failed receive so a dead connection does not spin the loop.
const RECV_RETRY_DELAY: Duration = Duration::from_millis(250);

pub(crate) enum Command {
    /// Bring the registration of `topic`'s channel in line with the directory.
    Sync {
        topic: Topic,
        ack: oneshot::Sender<Result<(), PubSubError>>,
    },
}

pub(crate) struct ListenerTask {
    backend: &'static str,
    listener: Box<dyn ChannelListener>,
    directory: Arc<SubscriptionDirectory>,
    prefix: String,
    listening: HashSet<String>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
}

impl ListenerTask {
    pub(crate) fn new(
        backend: &'static str,
        listener: Box<dyn ChannelListener>,
        directory: Arc<SubscriptionDirectory>,
        prefix: String,
        commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            listener,
            directory,
            prefix,
            listening: HashSet::new(),
            commands,
            cancel,
        }
    }

    /// Register the channels of topics that already have subscribers, e.g.
    /// when a relay is restarted. Runs before the task is spawned so errors
    /// reach the caller of `start()`.
    pub(crate) async fn listen_existing(&mut self) -> Result<(), PubSubError> {
        for topic in self.directory.topics() {
            self.reconcile(&topic).await?;
        }
        Ok(())
    }

    /// Spawn the task under a supervisor that reports how it ended.
    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        let backend = self.backend;
        tokio::spawn(async move {
            match AssertUnwindSafe(self.run()).catch_unwind().await {
                Ok(Ok(())) => debug!(backend, "relay listener stopped"),
                Ok(Err(e)) => error!(
                    backend,
                    error = %e,
                    "relay listener crashed; inbound delivery is halted until restart"
                ),
                Err(_) => error!(
                    backend,
                    "relay listener panicked; inbound delivery is halted until restart"
                ),
            }
        })
    }

    async fn run(mut self) -> Result<(), PubSubError> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ok(()),

                command = self.commands.recv() => match command {
                    Some(Command::Sync { topic, ack }) => {
                        let result = self.reconcile(&topic).await;
                        let _ = ack.send(result);
                    }
                    None => return Ok(()),
                },

                inbound = self.listener.recv() => match inbound {
                    Ok(Some(inbound)) => self.deliver(inbound),
                    Ok(None) => {
                        return Err(PubSubError::Transport(
                            "listener connection closed".to_string(),
                        ));
                    }
                    Err(e) => {
                        warn!(backend = self.backend, error = %e, "relay receive failed");
                        tokio::select! {
                            _ = self.cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(RECV_RETRY_DELAY) => {}
                        }
                    }
                },
            }
        }
    }

    async fn reconcile(&mut self, topic: &str) -> Result<(), PubSubError> {
        let channel = format!("{}{}", self.prefix, topic);
        let wanted = self.directory.has_topic(topic);
        let registered = self.listening.contains(&channel);

        if wanted && !registered {
            self.listener.listen(&channel).await?;
            self.listening.insert(channel.clone());
            debug!(backend = self.backend, %channel, "listening on channel");
        } else if !wanted && registered {
            self.listener.unlisten(&channel).await?;
            self.listening.remove(&channel);
            debug!(backend = self.backend, %channel, "stopped listening on channel");
        }
        Ok(())
    }

    fn deliver(&self, inbound: Inbound) {
        let envelope = match envelope::decode(&inbound.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    backend = self.backend,
                    channel = %inbound.channel,
                    error = %e,
                    payload = %truncate(&inbound.payload),
                    "dropping malformed relay message"
                );
                return;
            }
        };

        let expected = format!("{}{}", self.prefix, envelope.topic);
        if inbound.channel != expected {
            warn!(
                backend = self.backend,
                channel = %inbound.channel,
                topic = %envelope.topic,
                "dropping relay message whose topic does not match its channel"
            );
            return;
        }

        let dispatched = self.directory.broadcast(&envelope.topic, envelope.message);
        debug!(backend = self.backend, topic = %envelope.topic, dispatched, "relay message dispatched");
    }
}

fn truncate(payload: &str) -> String {
    payload.chars().take(100).collect()
}

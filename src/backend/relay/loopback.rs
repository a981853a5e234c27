//! In-process relay transport.
//!
//! A `LoopbackNetwork` stands in for a shared broker or database: every
//! relay built on a clone of the same network sees the same channels, so
//! several relay instances in one test behave like several processes
//! sharing a server. It also counts connections and registrations, can
//! inject raw payloads, and can be severed to simulate losing the server.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::{ChannelListener, ChannelPublisher, Inbound, RelayConnector};
use crate::utils::error::PubSubError;

const CAPACITY: usize = 1024;

/// Everything that has happened on a [`LoopbackNetwork`] so far.
#[derive(Debug, Clone, Default)]
pub struct LoopbackStats {
    pub publisher_connections: usize,
    pub listener_connections: usize,
    /// `listen` calls per channel.
    pub listens: HashMap<String, usize>,
    /// `unlisten` calls per channel.
    pub unlistens: HashMap<String, usize>,
    /// Payloads sent through publishers, in order. Injected payloads are not included.
    pub published: Vec<Inbound>,
}

#[derive(Clone)]
pub struct LoopbackNetwork {
    inner: Arc<Inner>,
}

struct Inner {
    sender: broadcast::Sender<Inbound>,
    stats: Mutex<LoopbackStats>,
    severed: CancellationToken,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("stats", &*self.inner.stats.lock())
            .field("severed", &self.is_severed())
            .finish()
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sender,
                stats: Mutex::new(LoopbackStats::default()),
                severed: CancellationToken::new(),
            }),
        }
    }

    pub fn stats(&self) -> LoopbackStats {
        self.inner.stats.lock().clone()
    }

    pub fn listen_calls(&self, channel: &str) -> usize {
        self.inner.stats.lock().listens.get(channel).copied().unwrap_or(0)
    }

    pub fn unlisten_calls(&self, channel: &str) -> usize {
        self.inner
            .stats
            .lock()
            .unlistens
            .get(channel)
            .copied()
            .unwrap_or(0)
    }

    pub fn published(&self) -> Vec<Inbound> {
        self.inner.stats.lock().published.clone()
    }

    /// Deliver a raw payload on `channel` as if some other process had sent it.
    pub fn inject(&self, channel: &str, payload: &str) {
        let _ = self.inner.sender.send(Inbound {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Drop every connection for good. Open listeners report the connection
    /// as closed, and later connects and sends fail.
    pub fn sever(&self) {
        self.inner.severed.cancel();
    }

    pub fn is_severed(&self) -> bool {
        self.inner.severed.is_cancelled()
    }

    fn ensure_connected(&self) -> Result<(), PubSubError> {
        if self.is_severed() {
            Err(PubSubError::Transport("loopback network severed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RelayConnector for LoopbackNetwork {
    async fn connect_publisher(&self) -> Result<Box<dyn ChannelPublisher>, PubSubError> {
        self.ensure_connected()?;
        self.inner.stats.lock().publisher_connections += 1;
        Ok(Box::new(LoopbackPublisher {
            network: self.clone(),
        }))
    }

    async fn connect_listener(&self) -> Result<Box<dyn ChannelListener>, PubSubError> {
        self.ensure_connected()?;
        self.inner.stats.lock().listener_connections += 1;
        Ok(Box::new(LoopbackListener {
            network: self.clone(),
            receiver: self.inner.sender.subscribe(),
            channels: HashSet::new(),
        }))
    }
}

struct LoopbackPublisher {
    network: LoopbackNetwork,
}

#[async_trait]
impl ChannelPublisher for LoopbackPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PubSubError> {
        self.network.ensure_connected()?;
        let inbound = Inbound {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        self.network
            .inner
            .stats
            .lock()
            .published
            .push(inbound.clone());
        // No receivers just means nobody is listening anywhere.
        let _ = self.network.inner.sender.send(inbound);
        Ok(())
    }
}

struct LoopbackListener {
    network: LoopbackNetwork,
    receiver: broadcast::Receiver<Inbound>,
    channels: HashSet<String>,
}

#[async_trait]
impl ChannelListener for LoopbackListener {
    async fn listen(&mut self, channel: &str) -> Result<(), PubSubError> {
        self.network.ensure_connected()?;
        self.channels.insert(channel.to_string());
        *self
            .network
            .inner
            .stats
            .lock()
            .listens
            .entry(channel.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn unlisten(&mut self, channel: &str) -> Result<(), PubSubError> {
        self.network.ensure_connected()?;
        self.channels.remove(channel);
        *self
            .network
            .inner
            .stats
            .lock()
            .unlistens
            .entry(channel.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Inbound>, PubSubError> {
        loop {
            tokio::select! {
                _ = self.network.inner.severed.cancelled() => return Ok(None),
                received = self.receiver.recv() => match received {
                    Ok(inbound) if self.channels.contains(&inbound.channel) => {
                        return Ok(Some(inbound));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        return Err(PubSubError::Transport(format!(
                            "loopback listener lagged, {skipped} payloads lost"
                        )));
                    }
                    Err(RecvError::Closed) => return Ok(None),
                },
            }
        }
    }
}

//! # livesub
//!
//! `livesub` is the publish/subscribe layer of a live-view server. Connected
//! sessions subscribe to named topics with an async handler, and any part of
//! the application can broadcast a JSON message to a topic. The backend is
//! pluggable: delivery can stay inside one process or fan out to every
//! process sharing a Redis server or a PostgreSQL database.
//!
//! ## Core Modules
//!
//! - `directory`: the process-local subscription bookkeeping and dispatch.
//! - `backend`: the `PubSubBackend` contract and its implementations.
//! - `session`: a per-connection view that fills in the session id.
//! - `testing`: a synchronous, recording backend for application tests.
//! - `config`: loads settings from `config/default.*` and the environment.
//! - `utils`: error types and logging setup.
//!
//! ```ignore
//! let backend: Arc<dyn PubSubBackend> = Arc::new(MemoryPubSub::new());
//! backend.start().await?;
//!
//! let session = SessionPubSub::new(backend.clone(), "session-1");
//! session
//!     .subscribe("orders", handler(|topic, message| async move {
//!         println!("{topic}: {message}");
//!         Ok(())
//!     }))
//!     .await?;
//! session.broadcast("orders", json!({"id": 1})).await?;
//!
//! session.close().await?;
//! backend.stop().await?;
//! ```

pub mod backend;
pub mod config;
pub mod directory;
pub mod session;
pub mod testing;
pub mod utils;

pub use backend::{BrokerRelay, LoopbackNetwork, MemoryPubSub, PubSubBackend, TransactionalRelay};
pub use directory::{Handler, HandlerResult, Message, SessionId, SubscriptionDirectory, Topic, handler};
pub use session::SessionPubSub;
pub use utils::error::PubSubError;

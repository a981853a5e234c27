//! Handler and identifier types
//!
//! A handler is the per-subscription callback: an async closure taking the
//! topic and the message. Handlers live only in the process that registered
//! them; relays move messages between processes, never handlers.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

pub type Topic = String;
pub type SessionId = String;

/// Payload carried by a broadcast.
pub type Message = Value;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

pub type Handler = Arc<dyn Fn(Topic, Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
///
/// ```ignore
/// let h = handler(|topic, message| async move {
///     tracing::info!(%topic, %message, "update");
///     Ok(())
/// });
/// ```
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Topic, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |topic, message| f(topic, message).boxed())
}

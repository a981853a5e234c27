//! The `directory` module is the process-local core of `livesub`: the
//! subscription bookkeeping and local dispatch that every backend shares.

pub mod engine;
pub mod handler;
mod index;

pub use engine::SubscriptionDirectory;
pub use handler::{Handler, HandlerError, HandlerResult, Message, SessionId, Topic, handler};

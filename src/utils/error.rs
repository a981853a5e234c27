//! The `error` module defines the error types used within `livesub`.
//!
//! Errors returned from the public API surface as [`PubSubError`]. Failures
//! that happen while dispatching to handlers or inside a relay's listener
//! task are logged where they occur and never reach a caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PubSubError {
    /// A data operation (or `stop`) was invoked while the backend is stopped.
    #[error("pub/sub backend is not running (attempted `{operation}`)")]
    NotRunning { operation: &'static str },

    #[error("pub/sub backend is already running")]
    AlreadyRunning,

    /// The serialized notification is too large for the transport.
    #[error("payload of {size} bytes must be shorter than {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid channel `{channel}`: {reason}")]
    InvalidChannel { channel: String, reason: String },

    #[error("channel prefix must not be empty")]
    InvalidPrefix,

    /// The relay's listener task has exited and can no longer register channels.
    #[error("relay listener is not available")]
    ListenerUnavailable,

    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Why an inbound relay payload could not be turned into an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("envelope is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("envelope field `topic` is not a string")]
    TopicNotString,
}

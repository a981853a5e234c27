//! Relay envelope
//!
//! Every payload a relay publishes is a JSON object with exactly two
//! required fields:
//!
//! ```json
//! { "topic": "orders", "message": { "id": 1 } }
//! ```
//!
//! `topic` routes the message back into local dispatch on the receiving
//! side; `message` is any JSON value, `null` included. A payload missing
//! either field is malformed and is never delivered.

use serde::Serialize;
use serde_json::Value;

use crate::directory::{Message, Topic};
use crate::utils::error::EnvelopeError;

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub topic: Topic,
    pub message: Message,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    topic: &'a str,
    message: &'a Value,
}

pub fn encode(topic: &str, message: &Message) -> Result<String, serde_json::Error> {
    serde_json::to_string(&EnvelopeRef { topic, message })
}

pub fn decode(payload: &str) -> Result<Envelope, EnvelopeError> {
    let value: Value = serde_json::from_str(payload).map_err(EnvelopeError::InvalidJson)?;
    let Value::Object(mut fields) = value else {
        return Err(EnvelopeError::NotAnObject);
    };

    let topic = match fields.remove("topic") {
        Some(Value::String(topic)) => topic,
        Some(_) => return Err(EnvelopeError::TopicNotString),
        None => return Err(EnvelopeError::MissingField("topic")),
    };
    let message = fields
        .remove("message")
        .ok_or(EnvelopeError::MissingField("message"))?;

    Ok(Envelope { topic, message })
}

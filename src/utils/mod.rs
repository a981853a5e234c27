//! The `utils` module holds the definitions shared across `livesub`: the
//! error types and the tracing setup used by the binary and the tests.

pub mod error;
pub mod logging;

pub use error::{EnvelopeError, PubSubError};

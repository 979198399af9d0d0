//! Codec errors

use thiserror::Error;

/// Errors raised while building or reading a notification packet
#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("Unknown event type '{0}'")]
    UnknownEventType(String),

    #[error("Packet truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Field '{field}' out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding connection-protocol messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Unknown message type
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Payload ended before a field could be read
    #[error("Truncated payload: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// A name field was not valid UTF-8
    #[error("Invalid string in field `{field}`")]
    InvalidString { field: &'static str },

    /// A field exceeds what the wire format can carry
    #[error("Field too large: {size} bytes exceeds maximum of {max} bytes")]
    FieldTooLarge { size: usize, max: usize },
}

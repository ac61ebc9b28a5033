//! Core error types for sshmux

use std::path::PathBuf;

use sshmux_protocol::{ChannelId, MessageType, OpenFailureReason, ProtocolError};
use thiserror::Error;

/// Errors raised by the connection multiplexer
#[derive(Error, Debug)]
pub enum MuxError {
    /// Malformed payload
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Peer addressed a channel id that is not in the channel table
    #[error("{message_type:?} for unknown channel {channel}")]
    UnknownChannel {
        message_type: MessageType,
        channel: u32,
    },

    /// Peer addressed a channel in a state that does not accept the message
    #[error("{message_type:?} not valid for {channel} in its current state")]
    ChannelNotOpen {
        message_type: MessageType,
        channel: ChannelId,
    },

    /// Window adjustment would overflow the 32-bit credit counter
    #[error("Window adjustment overflows credit on {channel}")]
    WindowOverflow { channel: ChannelId },

    /// Peer sent more data than the window we advertised
    #[error("Peer sent {len} bytes on {channel} with only {available} bytes of window left")]
    WindowExceeded {
        channel: ChannelId,
        len: usize,
        available: u32,
    },

    /// Local operation referenced a channel that is not (or no longer) open
    #[error("No such channel: {0}")]
    NoSuchChannel(ChannelId),

    /// The 32-bit local id space has been used up
    #[error("Local channel ids exhausted")]
    ChannelIdsExhausted,

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The multiplexer task is no longer running
    #[error("Multiplexer disconnected")]
    Disconnected,
}

impl MuxError {
    /// Whether this error must tear down the whole connection
    ///
    /// Protocol violations and transport failures are fatal; local state
    /// errors only concern the caller that triggered them.
    pub fn is_fatal(&self) -> bool {
        match self {
            MuxError::Protocol(_)
            | MuxError::UnknownChannel { .. }
            | MuxError::ChannelNotOpen { .. }
            | MuxError::WindowOverflow { .. }
            | MuxError::WindowExceeded { .. }
            | MuxError::Transport(_) => true,
            MuxError::NoSuchChannel(_) | MuxError::ChannelIdsExhausted | MuxError::Disconnected => {
                false
            }
        }
    }
}

/// Errors returned by [`ChannelHandle`](crate::ChannelHandle) operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel has been closed
    #[error("{0} is closed")]
    Closed(ChannelId),

    /// The multiplexer task is no longer running
    #[error("Multiplexer disconnected")]
    Disconnected,
}

/// Outcome of a request that did not succeed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// Peer answered with a failure reply
    #[error("Request rejected by peer")]
    Rejected,

    /// The owning channel or connection went away before a reply arrived
    #[error("Request cancelled")]
    Cancelled,
}

/// Outcome of a channel open that did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    /// Peer refused the channel
    #[error("Channel open rejected (reason {reason_code}): {description}")]
    Rejected { reason_code: u32, description: String },

    /// The connection went away before the peer answered
    #[error("Channel open cancelled")]
    Cancelled,
}

impl OpenError {
    /// Known reason for a rejection, if the peer used a standard code
    pub fn reason(&self) -> Option<OpenFailureReason> {
        match self {
            OpenError::Rejected { reason_code, .. } => OpenFailureReason::from_u32(*reason_code),
            OpenError::Cancelled => None,
        }
    }
}

/// Errors from the underlying transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport no longer accepts messages
    #[error("Transport closed")]
    Closed,

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

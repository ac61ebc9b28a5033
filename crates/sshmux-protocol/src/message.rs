//! Message types for the SSH connection protocol
//!
//! Each variant of [`Message`] mirrors one fixed payload layout. Messages are
//! converted to and from a [`Packet`] (tag + payload); framing, encryption and
//! sequence numbers belong to the transport underneath.
//!
//! # Message Flow
//!
//! Typical message sequence for a channel opened by this side:
//!
//! 1. `ChannelOpen` carrying our channel id, window and maximum packet size
//! 2. Peer answers `ChannelOpenConfirmation` (or `ChannelOpenFailure`)
//! 3. `ChannelRequest` (e.g. `pty-req`, `shell`) answered by
//!    `ChannelSuccess` / `ChannelFailure` when a reply is wanted
//! 4. `ChannelData` / `ChannelExtendedData` in both directions, bounded by the
//!    credit granted through `ChannelWindowAdjust`
//! 5. `ChannelEof` when a side has nothing more to send
//! 6. `ChannelClose` from both sides ends the channel

use bytes::Bytes;

use crate::codec::{Packet, PayloadReader, PayloadWriter};
use crate::error::ProtocolError;

/// Extended data type code for standard error output
pub const EXTENDED_DATA_STDERR: u32 = 1;

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Connection-scoped request
    GlobalRequest = 80,
    /// Positive reply to a global request
    RequestSuccess = 81,
    /// Negative reply to a global request
    RequestFailure = 82,
    /// Request to open a channel
    ChannelOpen = 90,
    /// Channel open accepted
    ChannelOpenConfirmation = 91,
    /// Channel open refused
    ChannelOpenFailure = 92,
    /// Grant of additional send credit
    ChannelWindowAdjust = 93,
    /// Channel data
    ChannelData = 94,
    /// Typed channel data (e.g. stderr)
    ChannelExtendedData = 95,
    /// Sender will transmit no more data
    ChannelEof = 96,
    /// Channel teardown
    ChannelClose = 97,
    /// Channel-scoped request
    ChannelRequest = 98,
    /// Positive reply to a channel request
    ChannelSuccess = 99,
    /// Negative reply to a channel request
    ChannelFailure = 100,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            80 => Some(Self::GlobalRequest),
            81 => Some(Self::RequestSuccess),
            82 => Some(Self::RequestFailure),
            90 => Some(Self::ChannelOpen),
            91 => Some(Self::ChannelOpenConfirmation),
            92 => Some(Self::ChannelOpenFailure),
            93 => Some(Self::ChannelWindowAdjust),
            94 => Some(Self::ChannelData),
            95 => Some(Self::ChannelExtendedData),
            96 => Some(Self::ChannelEof),
            97 => Some(Self::ChannelClose),
            98 => Some(Self::ChannelRequest),
            99 => Some(Self::ChannelSuccess),
            100 => Some(Self::ChannelFailure),
            _ => None,
        }
    }
}

/// Reason codes carried by `ChannelOpenFailure`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpenFailureReason {
    /// Policy forbids this channel
    AdministrativelyProhibited = 1,
    /// The channel's target could not be reached
    ConnectFailed = 2,
    /// Channel type not supported
    UnknownChannelType = 3,
    /// Out of channels, memory or similar
    ResourceShortage = 4,
}

impl OpenFailureReason {
    /// Convert to the wire value
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// Convert from the wire value
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::AdministrativelyProhibited),
            2 => Some(Self::ConnectFailed),
            3 => Some(Self::UnknownChannelType),
            4 => Some(Self::ResourceShortage),
            _ => None,
        }
    }
}

/// Connection protocol messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Connection-scoped request
    GlobalRequest {
        request_type: String,
        want_reply: bool,
        data: Bytes,
    },

    /// Global request accepted, with optional response data
    RequestSuccess { data: Bytes },

    /// Global request refused
    RequestFailure,

    /// Open a channel
    ChannelOpen {
        channel_type: String,
        sender_channel: u32,
        window_size: u32,
        max_packet: u32,
        /// Channel-type specific trailer
        data: Bytes,
    },

    /// Open accepted
    ChannelOpenConfirmation {
        recipient_channel: u32,
        sender_channel: u32,
        window_size: u32,
        max_packet: u32,
        data: Bytes,
    },

    /// Open refused
    ChannelOpenFailure {
        recipient_channel: u32,
        reason_code: u32,
        description: String,
        language: String,
    },

    /// Add send credit to a channel
    ChannelWindowAdjust {
        recipient_channel: u32,
        bytes_to_add: u32,
    },

    /// Channel data
    ChannelData { recipient_channel: u32, data: Bytes },

    /// Typed channel data
    ChannelExtendedData {
        recipient_channel: u32,
        data_type: u32,
        data: Bytes,
    },

    /// No more data from the sender
    ChannelEof { recipient_channel: u32 },

    /// Channel teardown
    ChannelClose { recipient_channel: u32 },

    /// Channel-scoped request
    ChannelRequest {
        recipient_channel: u32,
        request_type: String,
        want_reply: bool,
        data: Bytes,
    },

    /// Channel request accepted
    ChannelSuccess { recipient_channel: u32 },

    /// Channel request refused
    ChannelFailure { recipient_channel: u32 },
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::GlobalRequest { .. } => MessageType::GlobalRequest,
            Message::RequestSuccess { .. } => MessageType::RequestSuccess,
            Message::RequestFailure => MessageType::RequestFailure,
            Message::ChannelOpen { .. } => MessageType::ChannelOpen,
            Message::ChannelOpenConfirmation { .. } => MessageType::ChannelOpenConfirmation,
            Message::ChannelOpenFailure { .. } => MessageType::ChannelOpenFailure,
            Message::ChannelWindowAdjust { .. } => MessageType::ChannelWindowAdjust,
            Message::ChannelData { .. } => MessageType::ChannelData,
            Message::ChannelExtendedData { .. } => MessageType::ChannelExtendedData,
            Message::ChannelEof { .. } => MessageType::ChannelEof,
            Message::ChannelClose { .. } => MessageType::ChannelClose,
            Message::ChannelRequest { .. } => MessageType::ChannelRequest,
            Message::ChannelSuccess { .. } => MessageType::ChannelSuccess,
            Message::ChannelFailure { .. } => MessageType::ChannelFailure,
        }
    }

    /// The local channel this message is addressed to, if it is channel-scoped
    /// and arrives from the peer
    pub fn recipient_channel(&self) -> Option<u32> {
        match self {
            Message::ChannelOpenConfirmation {
                recipient_channel, ..
            }
            | Message::ChannelOpenFailure {
                recipient_channel, ..
            }
            | Message::ChannelWindowAdjust {
                recipient_channel, ..
            }
            | Message::ChannelData {
                recipient_channel, ..
            }
            | Message::ChannelExtendedData {
                recipient_channel, ..
            }
            | Message::ChannelEof { recipient_channel }
            | Message::ChannelClose { recipient_channel }
            | Message::ChannelRequest {
                recipient_channel, ..
            }
            | Message::ChannelSuccess { recipient_channel }
            | Message::ChannelFailure { recipient_channel } => Some(*recipient_channel),
            Message::GlobalRequest { .. }
            | Message::RequestSuccess { .. }
            | Message::RequestFailure
            | Message::ChannelOpen { .. } => None,
        }
    }

    /// Encode into a packet
    pub fn encode(&self) -> Result<Packet, ProtocolError> {
        let mut w = PayloadWriter::new();

        match self {
            Message::GlobalRequest {
                request_type,
                want_reply,
                data,
            } => {
                w.put_string(request_type)?.put_bool(*want_reply).put_raw(data);
            }
            Message::RequestSuccess { data } => {
                w.put_raw(data);
            }
            Message::RequestFailure => {}
            Message::ChannelOpen {
                channel_type,
                sender_channel,
                window_size,
                max_packet,
                data,
            } => {
                w.put_string(channel_type)?
                    .put_u32(*sender_channel)
                    .put_u32(*window_size)
                    .put_u32(*max_packet)
                    .put_raw(data);
            }
            Message::ChannelOpenConfirmation {
                recipient_channel,
                sender_channel,
                window_size,
                max_packet,
                data,
            } => {
                w.put_u32(*recipient_channel)
                    .put_u32(*sender_channel)
                    .put_u32(*window_size)
                    .put_u32(*max_packet)
                    .put_raw(data);
            }
            Message::ChannelOpenFailure {
                recipient_channel,
                reason_code,
                description,
                language,
            } => {
                w.put_u32(*recipient_channel)
                    .put_u32(*reason_code)
                    .put_string(description)?
                    .put_string(language)?;
            }
            Message::ChannelWindowAdjust {
                recipient_channel,
                bytes_to_add,
            } => {
                w.put_u32(*recipient_channel).put_u32(*bytes_to_add);
            }
            Message::ChannelData {
                recipient_channel,
                data,
            } => {
                w.put_u32(*recipient_channel).put_string(data)?;
            }
            Message::ChannelExtendedData {
                recipient_channel,
                data_type,
                data,
            } => {
                w.put_u32(*recipient_channel)
                    .put_u32(*data_type)
                    .put_string(data)?;
            }
            Message::ChannelEof { recipient_channel }
            | Message::ChannelClose { recipient_channel }
            | Message::ChannelSuccess { recipient_channel }
            | Message::ChannelFailure { recipient_channel } => {
                w.put_u32(*recipient_channel);
            }
            Message::ChannelRequest {
                recipient_channel,
                request_type,
                want_reply,
                data,
            } => {
                w.put_u32(*recipient_channel)
                    .put_string(request_type)?
                    .put_bool(*want_reply)
                    .put_raw(data);
            }
        }

        Ok(Packet::new(self.message_type().as_u8(), w.finish()))
    }

    /// Decode a packet
    ///
    /// Fixed-size messages ignore trailing bytes; a payload shorter than its
    /// layout is an error.
    pub fn decode(packet: Packet) -> Result<Self, ProtocolError> {
        let message_type = MessageType::from_u8(packet.message_type)
            .ok_or(ProtocolError::UnknownMessageType(packet.message_type))?;
        let mut r = PayloadReader::new(packet.payload);

        let message = match message_type {
            MessageType::GlobalRequest => Message::GlobalRequest {
                request_type: r.read_utf8("request type")?,
                want_reply: r.read_bool()?,
                data: r.read_remaining(),
            },
            MessageType::RequestSuccess => Message::RequestSuccess {
                data: r.read_remaining(),
            },
            MessageType::RequestFailure => Message::RequestFailure,
            MessageType::ChannelOpen => Message::ChannelOpen {
                channel_type: r.read_utf8("channel type")?,
                sender_channel: r.read_u32()?,
                window_size: r.read_u32()?,
                max_packet: r.read_u32()?,
                data: r.read_remaining(),
            },
            MessageType::ChannelOpenConfirmation => Message::ChannelOpenConfirmation {
                recipient_channel: r.read_u32()?,
                sender_channel: r.read_u32()?,
                window_size: r.read_u32()?,
                max_packet: r.read_u32()?,
                data: r.read_remaining(),
            },
            MessageType::ChannelOpenFailure => Message::ChannelOpenFailure {
                recipient_channel: r.read_u32()?,
                reason_code: r.read_u32()?,
                description: String::from_utf8_lossy(&r.read_string()?).into_owned(),
                // Some peers omit the language tag entirely
                language: if r.remaining() > 0 {
                    String::from_utf8_lossy(&r.read_string()?).into_owned()
                } else {
                    String::new()
                },
            },
            MessageType::ChannelWindowAdjust => Message::ChannelWindowAdjust {
                recipient_channel: r.read_u32()?,
                bytes_to_add: r.read_u32()?,
            },
            MessageType::ChannelData => Message::ChannelData {
                recipient_channel: r.read_u32()?,
                data: r.read_string()?,
            },
            MessageType::ChannelExtendedData => Message::ChannelExtendedData {
                recipient_channel: r.read_u32()?,
                data_type: r.read_u32()?,
                data: r.read_string()?,
            },
            MessageType::ChannelEof => Message::ChannelEof {
                recipient_channel: r.read_u32()?,
            },
            MessageType::ChannelClose => Message::ChannelClose {
                recipient_channel: r.read_u32()?,
            },
            MessageType::ChannelRequest => Message::ChannelRequest {
                recipient_channel: r.read_u32()?,
                request_type: r.read_utf8("request type")?,
                want_reply: r.read_bool()?,
                data: r.read_remaining(),
            },
            MessageType::ChannelSuccess => Message::ChannelSuccess {
                recipient_channel: r.read_u32()?,
            },
            MessageType::ChannelFailure => Message::ChannelFailure {
                recipient_channel: r.read_u32()?,
            },
        };

        Ok(message)
    }
}

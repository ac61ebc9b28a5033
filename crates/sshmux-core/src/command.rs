//! Outbound operations queued to the multiplexer task
//!
//! Application code never writes to the transport directly. Handles enqueue
//! a [`Command`]; the task that owns the connection applies commands one at a
//! time between inbound messages.

use std::fmt;

use bytes::Bytes;
use sshmux_protocol::ChannelId;

use crate::pending::{OpenSender, ReplySender};
use crate::traits::Channel;

/// An outbound operation for the connection task
pub enum Command {
    /// Open a channel of `channel.channel_type()`
    Open {
        channel: Box<dyn Channel>,
        extra: Bytes,
        reply: OpenSender,
    },
    /// Send a global request
    GlobalRequest {
        request_type: String,
        data: Bytes,
        reply: Option<ReplySender>,
    },
    /// Send channel data (credit already reserved)
    Data { channel: ChannelId, data: Bytes },
    /// Send typed channel data (credit already reserved)
    ExtendedData {
        channel: ChannelId,
        data_type: u32,
        data: Bytes,
    },
    /// Send end-of-file
    Eof { channel: ChannelId },
    /// Close the channel
    Close { channel: ChannelId },
    /// Send a channel request
    Request {
        channel: ChannelId,
        request_type: String,
        data: Bytes,
        reply: Option<ReplySender>,
    },
    /// Grant the peer more receive credit
    AdjustWindow { channel: ChannelId, bytes: u32 },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Open { channel, extra, .. } => f
                .debug_struct("Open")
                .field("channel_type", &channel.channel_type())
                .field("extra_len", &extra.len())
                .finish(),
            Command::GlobalRequest {
                request_type,
                reply,
                ..
            } => f
                .debug_struct("GlobalRequest")
                .field("request_type", request_type)
                .field("want_reply", &reply.is_some())
                .finish(),
            Command::Data { channel, data } => f
                .debug_struct("Data")
                .field("channel", channel)
                .field("len", &data.len())
                .finish(),
            Command::ExtendedData {
                channel,
                data_type,
                data,
            } => f
                .debug_struct("ExtendedData")
                .field("channel", channel)
                .field("data_type", data_type)
                .field("len", &data.len())
                .finish(),
            Command::Eof { channel } => f.debug_struct("Eof").field("channel", channel).finish(),
            Command::Close { channel } => {
                f.debug_struct("Close").field("channel", channel).finish()
            }
            Command::Request {
                channel,
                request_type,
                reply,
                ..
            } => f
                .debug_struct("Request")
                .field("channel", channel)
                .field("request_type", request_type)
                .field("want_reply", &reply.is_some())
                .finish(),
            Command::AdjustWindow { channel, bytes } => f
                .debug_struct("AdjustWindow")
                .field("channel", channel)
                .field("bytes", bytes)
                .finish(),
        }
    }
}

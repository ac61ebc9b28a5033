//! Channel factory trait

use bytes::Bytes;
use sshmux_protocol::OpenFailureReason;

use super::Channel;

/// Refusal of an inbound CHANNEL_OPEN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRejection {
    /// Reason code sent in CHANNEL_OPEN_FAILURE
    pub reason_code: u32,
    /// Human-readable text sent with it
    pub description: String,
}

impl OpenRejection {
    /// Create a rejection with a standard reason
    pub fn new(reason: OpenFailureReason, description: impl Into<String>) -> Self {
        Self {
            reason_code: reason.as_u32(),
            description: description.into(),
        }
    }

    /// Rejection for a channel type this side does not know
    pub fn unknown_type(channel_type: &str) -> Self {
        Self::new(
            OpenFailureReason::UnknownChannelType,
            format!("unknown channel type: {}", channel_type),
        )
    }
}

/// Produces channels for inbound open requests
pub trait ChannelFactory: Send {
    /// Build a channel of `channel_type`, or refuse with a reason
    ///
    /// `window_size` and `max_packet` are the peer's: the credit this side
    /// starts with and the largest payload the peer accepts.
    fn create(
        &mut self,
        channel_type: &str,
        window_size: u32,
        max_packet: u32,
        data: Bytes,
    ) -> Result<Box<dyn Channel>, OpenRejection>;
}

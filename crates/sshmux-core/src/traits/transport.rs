//! Transport trait

use sshmux_protocol::Packet;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Outbound side of the authenticated, encrypted transport
///
/// Implementations must not block: the multiplexer calls `send` while
/// processing an inbound message.
pub trait Transport: Send {
    /// Queue one message for transmission
    fn send(&mut self, packet: Packet) -> Result<(), TransportError>;
}

impl Transport for mpsc::UnboundedSender<Packet> {
    fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        mpsc::UnboundedSender::send(self, packet).map_err(|_| TransportError::Closed)
    }
}

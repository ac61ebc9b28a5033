//! sshmux-protocol: Wire codec for the SSH connection protocol
//!
//! This crate encodes and decodes the fixed set of connection-protocol
//! message layouts (global requests and channel messages, tags 80..=100)
//! to and from the opaque payload carried by an already-authenticated,
//! already-encrypted transport.

pub mod channel_id;
pub mod codec;
pub mod error;
pub mod message;

pub use channel_id::ChannelId;
pub use codec::{Packet, PayloadReader, PayloadWriter};
pub use error::ProtocolError;
pub use message::{Message, MessageType, OpenFailureReason, EXTENDED_DATA_STDERR};

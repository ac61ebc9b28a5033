//! sshmux: SSH connection-protocol channel multiplexer
//!
//! This crate multiplexes logical channels over one authenticated,
//! encrypted transport. It provides:
//! - The connection state machine and its async driver
//! - The request registry matching replies to outstanding requests
//! - Channel factories and a `session` channel running shells, commands and
//!   subsystems

pub mod channel;
pub mod connection;
pub mod factory;
pub mod registry;
pub mod session;

pub use channel::{ChannelEvent, ForwardingChannel};
pub use connection::{ChannelState, Connection, MuxHandle, Multiplexer};
pub use factory::{RejectAllFactory, SessionFactory};
pub use registry::{PendingKey, RequestRegistry};

pub use sshmux_core::config::{self, MuxConfig};
pub use sshmux_core::traits::{
    canonical_name, Channel, ChannelFactory, GlobalReply, GlobalRequestHandler, Transport,
};
pub use sshmux_core::{
    ChannelError, ChannelHandle, MuxError, OpenError, PendingOpen, PendingReply, RequestError,
};
pub use sshmux_protocol::{ChannelId, Message, Packet};

//! Connection multiplexer and its async driver

mod driver;
mod multiplexer;

pub use driver::{MuxHandle, Multiplexer};
pub use multiplexer::{ChannelState, Connection};

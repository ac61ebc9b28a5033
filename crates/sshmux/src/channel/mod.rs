//! Ready-made channel implementations

mod forwarding;

pub use forwarding::{ChannelEvent, ForwardingChannel};

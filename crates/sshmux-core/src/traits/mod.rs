//! Collaborator trait definitions

mod channel;
mod factory;
mod global;
mod transport;

pub use channel::{canonical_name, Channel, RequestHandler, RequestHandlers};
pub use factory::{ChannelFactory, OpenRejection};
pub use global::{GlobalReply, GlobalRequestHandler};
pub use transport::Transport;

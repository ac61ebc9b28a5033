//! sshmux-core: Core abstractions for the sshmux channel multiplexer
//!
//! This crate provides the error taxonomy, configuration structures,
//! per-channel flow-control window, application-facing channel handles and
//! the collaborator traits (transport, channel, channel factory, global
//! request handler) shared by the multiplexer and channel implementations.

pub mod command;
pub mod config;
pub mod error;
pub mod handle;
pub mod pending;
pub mod traits;
pub mod window;

pub use command::Command;
pub use error::{ChannelError, MuxError, OpenError, RequestError, TransportError};
pub use handle::ChannelHandle;
pub use pending::{PendingOpen, PendingReply, RequestId};
pub use window::Window;

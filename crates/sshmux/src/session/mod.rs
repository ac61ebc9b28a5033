//! Interactive sessions: shells, commands and subsystems
//!
//! [`Session`] implements the `session` channel type on top of the
//! multiplexer's request dispatch. Process creation is delegated to a
//! [`ProcessSpawner`]; [`PtySpawner`] runs processes on a pseudo-terminal.

mod channel;
mod pty;
pub mod request;
mod spawner;
mod subsystem;

pub use channel::Session;
pub use pty::PtySpawner;
pub use request::{
    EnvRequest, ExecRequest, ExitStatus, PtyRequest, SubsystemRequest, TerminalSize, WindowChange,
};
pub use spawner::{ChildProcess, OutputSink, ProcessSpawner, SpawnCommand};
pub use subsystem::{Echo, Subsystem, SubsystemRegistry};

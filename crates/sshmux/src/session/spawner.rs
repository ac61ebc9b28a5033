//! Process spawning for session channels
//!
//! A session does not know how processes are started. It asks a
//! [`ProcessSpawner`] and hands it an [`OutputSink`]; the spawner's reader
//! pushes output into the sink and the sink's pump task writes it to the
//! channel with flow control, then reports the exit status, sends EOF and
//! closes the channel.
//!
//! Both directions are bounded. The sink queue holds a fixed number of
//! chunks, so a reader waits while the peer grants no send credit. Session
//! channels do not refill their receive window on arrival; the process side
//! returns credit with [`OutputSink::input_consumed`] once input is written.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::sync::mpsc;

use sshmux_core::ChannelHandle;
use sshmux_protocol::EXTENDED_DATA_STDERR;

use super::request::{ExitStatus, TerminalSize};

/// What a session asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnCommand {
    /// The configured login shell
    Shell,
    /// A command line run through the shell
    Exec(String),
}

/// Starts processes for session channels
pub trait ProcessSpawner: Send + Sync {
    /// Start `command` with `environment` in `working_dir`
    ///
    /// Output and the final exit status must be delivered through `sink`.
    fn spawn(
        &self,
        command: &SpawnCommand,
        environment: &BTreeMap<String, String>,
        working_dir: &Path,
        sink: OutputSink,
    ) -> Result<Box<dyn ChildProcess>>;
}

/// A running process attached to a session channel
pub trait ChildProcess: Send {
    /// Queue channel data for the process's input
    ///
    /// Once the data has been written, report it with
    /// [`OutputSink::input_consumed`] so the peer may send more.
    fn write_stdin(&mut self, data: Bytes) -> io::Result<()>;

    /// The peer sent EOF
    fn close_stdin(&mut self) {}

    /// The client's terminal changed size
    fn resize(&mut self, size: TerminalSize) -> Result<()> {
        let _ = size;
        Ok(())
    }

    /// The channel closed; stop the process
    fn terminate(&mut self);
}

#[derive(Debug)]
enum SinkEvent {
    Stdout(Bytes),
    Stderr(Bytes),
    Exited(Option<u32>),
}

/// Output chunks queued per sink before producers wait
pub const SINK_CAPACITY: usize = 32;

/// Ordered output path from a process back to its channel
#[derive(Debug, Clone)]
pub struct OutputSink {
    events: mpsc::Sender<SinkEvent>,
    handle: ChannelHandle,
}

impl OutputSink {
    /// Start a pump task writing to `handle`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(handle: ChannelHandle) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("Output sink requires a tokio runtime")?;

        let (events, rx) = mpsc::channel(SINK_CAPACITY);
        runtime.spawn(pump(handle.clone(), rx));
        Ok(Self { events, handle })
    }

    /// Queue standard output; returns false once the channel is gone
    pub async fn stdout(&self, data: impl Into<Bytes>) -> bool {
        self.events.send(SinkEvent::Stdout(data.into())).await.is_ok()
    }

    /// Queue standard error; returns false once the channel is gone
    pub async fn stderr(&self, data: impl Into<Bytes>) -> bool {
        self.events.send(SinkEvent::Stderr(data.into())).await.is_ok()
    }

    /// The process exited; flush, report `code`, then send EOF and close
    pub async fn exited(&self, code: Option<u32>) {
        let _ = self.events.send(SinkEvent::Exited(code)).await;
    }

    /// [`stdout`](Self::stdout) for blocking threads
    ///
    /// Must not be called from async code.
    pub fn blocking_stdout(&self, data: impl Into<Bytes>) -> bool {
        self.events
            .blocking_send(SinkEvent::Stdout(data.into()))
            .is_ok()
    }

    /// [`exited`](Self::exited) for blocking threads
    pub fn blocking_exited(&self, code: Option<u32>) {
        let _ = self.events.blocking_send(SinkEvent::Exited(code));
    }

    /// `bytes` of channel input were consumed; grant the peer that much
    /// more receive window
    pub fn input_consumed(&self, bytes: usize) {
        let bytes = u32::try_from(bytes).unwrap_or(u32::MAX);
        if bytes == 0 {
            return;
        }
        if let Err(e) = self.handle.adjust_window(bytes) {
            tracing::debug!("{} window not adjusted: {}", self.handle.id(), e);
        }
    }
}

async fn pump(handle: ChannelHandle, mut events: mpsc::Receiver<SinkEvent>) {
    while let Some(event) = events.recv().await {
        let result = match event {
            SinkEvent::Stdout(data) => handle.write(data).await,
            SinkEvent::Stderr(data) => handle.write_extended(EXTENDED_DATA_STDERR, data).await,
            SinkEvent::Exited(code) => {
                finish(&handle, code);
                return;
            }
        };

        if let Err(e) = result {
            tracing::debug!("{} output dropped: {}", handle.id(), e);
            return;
        }
    }
}

fn finish(handle: &ChannelHandle, code: Option<u32>) {
    match code {
        Some(code) => {
            tracing::info!("{} process exited with code {}", handle.id(), code);
            if let Err(e) = handle.request("exit-status", ExitStatus { code }.encode(), false) {
                tracing::debug!("{} exit status not sent: {}", handle.id(), e);
            }
        }
        None => tracing::info!("{} process exited without a status", handle.id()),
    }

    let _ = handle.send_eof();
    let _ = handle.close();
}

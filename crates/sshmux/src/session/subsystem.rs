//! Named subsystems started by `subsystem` requests

use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::sync::mpsc;

use sshmux_core::ChannelHandle;

use super::spawner::OutputSink;

/// In-process handler attached to a session channel
///
/// The session does not refill its receive window on arrival. A subsystem
/// grants credit for consumed input with [`OutputSink::input_consumed`] or
/// [`ChannelHandle::adjust_window`].
pub trait Subsystem: Send {
    /// Channel data arrived; must not block
    fn data_received(&mut self, data: Bytes);

    /// The peer sent EOF
    fn eof_received(&mut self) {}

    /// The channel closed
    fn closed(&mut self) {}
}

type Starter = Box<dyn Fn(ChannelHandle) -> Result<Box<dyn Subsystem>> + Send + Sync>;

/// Subsystems a session may start, by name
#[derive(Default)]
pub struct SubsystemRegistry {
    starters: HashMap<String, Starter>,
}

impl SubsystemRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `starter` under `name`
    pub fn register<F>(&mut self, name: &str, starter: F) -> &mut Self
    where
        F: Fn(ChannelHandle) -> Result<Box<dyn Subsystem>> + Send + Sync + 'static,
    {
        self.starters.insert(name.to_string(), Box::new(starter));
        self
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F>(mut self, name: &str, starter: F) -> Self
    where
        F: Fn(ChannelHandle) -> Result<Box<dyn Subsystem>> + Send + Sync + 'static,
    {
        self.register(name, starter);
        self
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.starters.contains_key(name)
    }

    /// Start subsystem `name` on the channel behind `handle`
    pub fn start(&self, name: &str, handle: ChannelHandle) -> Result<Box<dyn Subsystem>> {
        let starter = self
            .starters
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown subsystem: {}", name))?;
        starter(handle)
    }
}

impl fmt::Debug for SubsystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.starters.keys().collect();
        names.sort();
        f.debug_struct("SubsystemRegistry")
            .field("names", &names)
            .finish()
    }
}

/// Sends every byte back; exits with status 0 on EOF
#[derive(Debug)]
pub struct Echo {
    input: mpsc::UnboundedSender<Option<Bytes>>,
}

impl Echo {
    /// Starter for [`SubsystemRegistry::register`]
    pub fn start(handle: ChannelHandle) -> Result<Box<dyn Subsystem>> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("Echo subsystem requires a tokio runtime")?;
        let sink = OutputSink::spawn(handle)?;

        // Pending input never exceeds the receive window: credit comes back
        // only after each chunk is queued for output
        let (input, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_echo(sink, rx));
        Ok(Box::new(Self { input }))
    }
}

async fn run_echo(sink: OutputSink, mut input: mpsc::UnboundedReceiver<Option<Bytes>>) {
    while let Some(chunk) = input.recv().await {
        let Some(data) = chunk else {
            sink.exited(Some(0)).await;
            return;
        };
        let len = data.len();
        if !sink.stdout(data).await {
            return;
        }
        sink.input_consumed(len);
    }
}

impl Subsystem for Echo {
    fn data_received(&mut self, data: Bytes) {
        let _ = self.input.send(Some(data));
    }

    fn eof_received(&mut self) {
        let _ = self.input.send(None);
    }
}

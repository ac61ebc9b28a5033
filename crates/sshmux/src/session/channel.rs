//! The `session` channel
//!
//! A session collects environment and terminal settings from its requests,
//! then runs exactly one client: a process (`shell` or `exec`) or an
//! in-process subsystem. Channel data goes to the client; the client's
//! output comes back through an [`OutputSink`](super::OutputSink). Receive
//! window credit is returned only as the client consumes its input.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use sshmux_core::config::{ChannelConfig, SessionConfig};
use sshmux_core::traits::{Channel, RequestHandlers};
use sshmux_core::ChannelHandle;
use sshmux_protocol::EXTENDED_DATA_STDERR;

use super::request::{EnvRequest, ExecRequest, PtyRequest, SubsystemRequest, TerminalSize, WindowChange};
use super::spawner::{ChildProcess, OutputSink, ProcessSpawner, SpawnCommand};
use super::subsystem::{Subsystem, SubsystemRegistry};

enum SessionClient {
    Process(Box<dyn ChildProcess>),
    Subsystem(Box<dyn Subsystem>),
}

/// Server side of a `session` channel
pub struct Session {
    channel_config: ChannelConfig,
    config: SessionConfig,
    spawner: Arc<dyn ProcessSpawner>,
    subsystems: Arc<SubsystemRegistry>,
    handlers: RequestHandlers<Session>,
    handle: Option<ChannelHandle>,
    environment: BTreeMap<String, String>,
    terminal: Option<TerminalSize>,
    client: Option<SessionClient>,
}

impl Session {
    /// Create a session
    pub fn new(
        channel_config: ChannelConfig,
        config: SessionConfig,
        spawner: Arc<dyn ProcessSpawner>,
        subsystems: Arc<SubsystemRegistry>,
    ) -> Self {
        let environment = config.default_env.iter().cloned().collect();

        let handlers = RequestHandlers::<Session>::new()
            .with("pty-req", Session::request_pty_req)
            .with("shell", Session::request_shell)
            .with("exec", Session::request_exec)
            .with("subsystem", Session::request_subsystem)
            .with("env", Session::request_env)
            .with("window-change", Session::request_window_change);

        Self {
            channel_config,
            config,
            spawner,
            subsystems,
            handlers,
            handle: None,
            environment,
            terminal: None,
            client: None,
        }
    }

    /// Environment a process would be started with
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Terminal size from `pty-req` / `window-change`
    pub fn terminal(&self) -> Option<TerminalSize> {
        self.terminal
    }

    /// Whether a process or subsystem is attached
    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    fn set_terminal_size(&mut self, size: TerminalSize) {
        self.environment
            .insert("LINES".to_string(), size.rows.to_string());
        self.environment
            .insert("COLUMNS".to_string(), size.cols.to_string());
        self.terminal = Some(size);
    }

    fn request_pty_req(&mut self, data: Bytes) -> bool {
        let request = match PtyRequest::decode(data) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Malformed pty-req: {}", e);
                return false;
            }
        };

        tracing::debug!("pty-req {} {}x{}", request.term, request.cols, request.rows);
        self.environment.insert("TERM".to_string(), request.term.clone());
        self.set_terminal_size(request.size());
        true
    }

    fn request_shell(&mut self, _data: Bytes) -> bool {
        if self.terminal.is_none() {
            tracing::debug!("shell requested without a pty-req");
            return false;
        }
        self.start_process(SpawnCommand::Shell)
    }

    fn request_exec(&mut self, data: Bytes) -> bool {
        if !self.config.exec_enabled {
            tracing::info!("exec request refused: exec is disabled");
            return false;
        }

        match ExecRequest::decode(data) {
            Ok(request) => self.start_process(SpawnCommand::Exec(request.command)),
            Err(e) => {
                tracing::warn!("Malformed exec request: {}", e);
                false
            }
        }
    }

    fn start_process(&mut self, command: SpawnCommand) -> bool {
        if self.client.is_some() {
            tracing::warn!("Session already has a client, refusing {:?}", command);
            return false;
        }
        let Some(handle) = self.handle.clone() else {
            return false;
        };

        let sink = match OutputSink::spawn(handle) {
            Ok(sink) => sink,
            Err(e) => {
                tracing::error!("Cannot attach output for {:?}: {:#}", command, e);
                return false;
            }
        };

        match self
            .spawner
            .spawn(&command, &self.environment, &self.config.working_dir, sink)
        {
            Ok(child) => {
                tracing::info!("Session started {:?}", command);
                self.client = Some(SessionClient::Process(child));
                true
            }
            Err(e) => {
                tracing::error!("Failed to start {:?}: {:#}", command, e);
                false
            }
        }
    }

    fn request_subsystem(&mut self, data: Bytes) -> bool {
        let name = match SubsystemRequest::decode(data) {
            Ok(request) => request.name,
            Err(e) => {
                tracing::warn!("Malformed subsystem request: {}", e);
                return false;
            }
        };

        if self.client.is_some() {
            tracing::warn!("Session already has a client, refusing subsystem {}", name);
            return false;
        }
        let Some(handle) = self.handle.clone() else {
            return false;
        };

        match self.subsystems.start(&name, handle) {
            Ok(subsystem) => {
                tracing::info!("Session started subsystem {}", name);
                self.client = Some(SessionClient::Subsystem(subsystem));
                true
            }
            Err(e) => {
                tracing::info!("Subsystem request refused: {:#}", e);
                false
            }
        }
    }

    fn request_env(&mut self, data: Bytes) -> bool {
        match EnvRequest::decode(data) {
            Ok(request) => {
                tracing::debug!("env {}", request.name);
                self.environment.insert(request.name, request.value);
                true
            }
            Err(e) => {
                tracing::warn!("Malformed env request: {}", e);
                false
            }
        }
    }

    fn request_window_change(&mut self, data: Bytes) -> bool {
        let size = match WindowChange::decode(data) {
            Ok(change) => change.size(),
            Err(e) => {
                tracing::warn!("Malformed window-change: {}", e);
                return false;
            }
        };

        self.set_terminal_size(size);
        if let Some(SessionClient::Process(child)) = &mut self.client {
            if let Err(e) = child.resize(size) {
                tracing::warn!("{:#}", e);
                return false;
            }
        }
        true
    }

    fn grant_window(&self, bytes: usize) {
        if let Some(handle) = &self.handle {
            let _ = handle.adjust_window(u32::try_from(bytes).unwrap_or(u32::MAX));
        }
    }

    fn close_channel(&self) {
        if let Some(handle) = &self.handle {
            let _ = handle.close();
        }
    }
}

impl Channel for Session {
    fn channel_type(&self) -> &str {
        "session"
    }

    fn window_size(&self) -> u32 {
        self.channel_config.window_size
    }

    fn max_packet(&self) -> u32 {
        self.channel_config.max_packet
    }

    fn replenishes_window(&self) -> bool {
        false
    }

    fn opened(&mut self, handle: ChannelHandle, _data: Bytes) {
        tracing::debug!("Session {} open", handle.id());
        self.handle = Some(handle);
    }

    fn data_received(&mut self, data: Bytes) {
        match &mut self.client {
            Some(SessionClient::Process(child)) => {
                if let Err(e) = child.write_stdin(data) {
                    tracing::warn!("Failed to write to process: {}", e);
                    self.close_channel();
                }
            }
            Some(SessionClient::Subsystem(subsystem)) => subsystem.data_received(data),
            None => {
                tracing::warn!("{} bytes of data before a client was started, closing", data.len());
                self.close_channel();
            }
        }
    }

    fn extended_data_received(&mut self, data_type: u32, data: Bytes) {
        if data_type == EXTENDED_DATA_STDERR {
            tracing::debug!("Ignoring {} bytes of stderr from the client", data.len());
        } else {
            tracing::debug!("Ignoring {} bytes of extended data type {}", data.len(), data_type);
        }
        self.grant_window(data.len());
    }

    fn eof_received(&mut self) {
        match &mut self.client {
            Some(SessionClient::Process(child)) => child.close_stdin(),
            Some(SessionClient::Subsystem(subsystem)) => subsystem.eof_received(),
            None => {}
        }
    }

    fn closed(&mut self) {
        match self.client.take() {
            Some(SessionClient::Process(mut child)) => child.terminate(),
            Some(SessionClient::Subsystem(mut subsystem)) => subsystem.closed(),
            None => {}
        }
        self.handle = None;
    }

    fn request_received(&mut self, request_type: &str, data: Bytes) -> bool {
        match self.handlers.get(request_type) {
            Some(handler) => handler(self, data),
            None => {
                tracing::debug!("Unhandled session request {}", request_type);
                false
            }
        }
    }
}

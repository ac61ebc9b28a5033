//! Pseudo-terminal process spawner
//!
//! Runs session processes on a PTY using the portable-pty crate. Output is
//! read on a blocking task and fed to the session's [`OutputSink`]; input is
//! written on another blocking task so a child that stops reading never
//! stalls the connection.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtyPair, PtySize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::request::TerminalSize;
use super::spawner::{ChildProcess, OutputSink, ProcessSpawner, SpawnCommand};

/// End-of-transmission character the line discipline turns into EOF
const PTY_EOF: u8 = 0x04;

/// Validate that the shell exists (and, on Unix, is a listed login shell
/// when `/etc/shells` is present)
fn validate_shell_path(shell: &str) -> Result<String> {
    let path = Path::new(shell);
    if !path.is_absolute() || !path.exists() {
        anyhow::bail!("Shell '{}' does not exist", shell);
    }

    #[cfg(unix)]
    if let Ok(shells) = std::fs::read_to_string("/etc/shells") {
        let listed = shells.lines().any(|line| {
            let line = line.trim();
            !line.starts_with('#') && line == shell
        });
        if !listed {
            tracing::warn!("Shell '{}' is not listed in /etc/shells", shell);
        }
    }

    Ok(shell.to_string())
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Terminal size from the session environment, falling back to 24x80
fn size_from_environment(environment: &BTreeMap<String, String>) -> TerminalSize {
    let field = |name: &str| environment.get(name).and_then(|v| v.parse::<u16>().ok());
    let default = TerminalSize::default();
    TerminalSize::new(
        field("LINES").unwrap_or(default.rows),
        field("COLUMNS").unwrap_or(default.cols),
    )
}

/// Spawns session processes on a pseudo-terminal
#[derive(Debug, Clone)]
pub struct PtySpawner {
    shell: String,
}

impl PtySpawner {
    /// Create a spawner running commands through `shell`
    pub fn new(shell: &str) -> Result<Self> {
        let shell = validate_shell_path(shell)
            .with_context(|| format!("Invalid shell configured: {}", shell))?;
        Ok(Self { shell })
    }

    /// Shell used for `shell` and `exec` requests
    pub fn shell(&self) -> &str {
        &self.shell
    }
}

impl ProcessSpawner for PtySpawner {
    fn spawn(
        &self,
        command: &SpawnCommand,
        environment: &BTreeMap<String, String>,
        working_dir: &Path,
        sink: OutputSink,
    ) -> Result<Box<dyn ChildProcess>> {
        let size = size_from_environment(environment);
        tracing::info!(
            "Starting {:?} on a {}x{} PTY",
            command,
            size.cols,
            size.rows
        );

        let PtyPair { master, slave } = native_pty_system()
            .openpty(pty_size(size))
            .with_context(|| "Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(&self.shell);
        if let SpawnCommand::Exec(line) = command {
            cmd.arg("-c");
            cmd.arg(line);
        }
        cmd.cwd(working_dir);
        for (key, value) in environment {
            cmd.env(key, value);
        }

        let child = slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {}", self.shell))?;
        // The child holds its own copy; ours would keep the PTY open after exit
        drop(slave);

        let pid = child.process_id();
        tracing::debug!("Spawned process with PID: {:?}", pid);

        let reader = master
            .try_clone_reader()
            .with_context(|| "Failed to clone PTY reader")?;
        let writer = master
            .take_writer()
            .with_context(|| "Failed to take PTY writer")?;
        let killer = child.clone_killer();

        let stdin = spawn_pty_writer(writer, sink.clone());
        let reader_task = spawn_pty_reader(reader, child, sink);

        Ok(Box::new(PtyProcess {
            master,
            stdin: Some(stdin),
            killer,
            pid,
            reader_task,
        }))
    }
}

/// Copy PTY output into `sink` until EOF, then report the exit status
fn spawn_pty_reader(
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn portable_pty::Child + Send + Sync>,
    sink: OutputSink,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];

        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!("PTY reader EOF");
                    break;
                }
                Ok(n) => {
                    // Waits here while the peer grants no send credit
                    if !sink.blocking_stdout(Bytes::copy_from_slice(&buf[..n])) {
                        tracing::debug!("PTY output dropped, channel gone");
                        break;
                    }
                }
                Err(e) => {
                    // Linux reports EIO on the master once the child side closes
                    if e.kind() == io::ErrorKind::Other || e.kind() == io::ErrorKind::BrokenPipe {
                        tracing::debug!("PTY reader closed: {}", e);
                    } else {
                        tracing::error!("PTY read error: {}", e);
                    }
                    break;
                }
            }
        }

        let code = match child.wait() {
            Ok(status) => Some(status.exit_code()),
            Err(e) => {
                tracing::warn!("Failed to collect exit status: {}", e);
                None
            }
        };
        sink.blocking_exited(code);
    })
}

enum StdinEvent {
    Data(Bytes),
    Eof,
}

/// Write channel input to the PTY, returning window credit as it goes
fn spawn_pty_writer(
    mut writer: Box<dyn Write + Send>,
    sink: OutputSink,
) -> mpsc::UnboundedSender<StdinEvent> {
    // Holds at most one receive window of input; credit returns only after
    // each write
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::task::spawn_blocking(move || {
        while let Some(event) = rx.blocking_recv() {
            match event {
                StdinEvent::Data(data) => {
                    if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                        tracing::debug!("PTY input closed: {}", e);
                        break;
                    }
                    sink.input_consumed(data.len());
                }
                StdinEvent::Eof => {
                    if let Err(e) = writer.write_all(&[PTY_EOF]).and_then(|_| writer.flush()) {
                        tracing::debug!("Failed to signal EOF to PTY: {}", e);
                    }
                    break;
                }
            }
        }
        tracing::debug!("PTY writer finished");
    });

    tx
}

/// A process running on a PTY
struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    stdin: Option<mpsc::UnboundedSender<StdinEvent>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    reader_task: JoinHandle<()>,
}

impl ChildProcess for PtyProcess {
    fn write_stdin(&mut self, data: Bytes) -> io::Result<()> {
        let closed = || io::Error::new(io::ErrorKind::BrokenPipe, "PTY input closed");
        self.stdin
            .as_ref()
            .ok_or_else(closed)?
            .send(StdinEvent::Data(data))
            .map_err(|_| closed())
    }

    fn close_stdin(&mut self) {
        if let Some(stdin) = self.stdin.take() {
            let _ = stdin.send(StdinEvent::Eof);
        }
    }

    fn resize(&mut self, size: TerminalSize) -> Result<()> {
        tracing::debug!("Resizing PTY to {}x{}", size.cols, size.rows);
        self.master
            .resize(pty_size(size))
            .with_context(|| "Failed to resize PTY")
    }

    fn terminate(&mut self) {
        self.stdin = None;
        if self.reader_task.is_finished() {
            return;
        }
        tracing::info!("Terminating process {:?}", self.pid);
        if let Err(e) = self.killer.kill() {
            tracing::debug!("Failed to kill process {:?}: {}", self.pid, e);
        }
    }
}

//! sshmux loopback runner
//!
//! Connects two multiplexers back to back in one process, opens a session
//! channel from the client side and runs a command or subsystem on the
//! server side. Output is copied to the local terminal and the process's
//! exit status becomes ours.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sshmux::config::{self, MuxConfig};
use sshmux::session::{
    Echo, ExecRequest, ExitStatus, PtyRequest, PtySpawner, SubsystemRegistry, SubsystemRequest,
    TerminalSize,
};
use sshmux::{
    canonical_name, ChannelEvent, ChannelHandle, ForwardingChannel, Multiplexer, PendingReply,
    RejectAllFactory, SessionFactory,
};

#[derive(Parser)]
#[command(name = "sshmux-loopback")]
#[command(about = "Run a session over an in-process sshmux connection")]
#[command(version)]
struct Args {
    /// Command line to execute on the server side
    #[arg(short, long, conflicts_with = "subsystem")]
    command: Option<String>,

    /// Subsystem to start instead of a command (e.g. echo)
    #[arg(short, long)]
    subsystem: Option<String>,

    /// Data written to the channel before EOF
    #[arg(short, long)]
    input: Option<String>,

    /// Request a pseudo-terminal first
    #[arg(long)]
    pty: bool,

    /// TERM value sent with the pty request
    #[arg(long, default_value = "xterm-256color")]
    term: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Path to configuration file
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,
}

async fn expect_success(reply: Option<PendingReply>, what: &str) -> Result<()> {
    if let Some(reply) = reply {
        reply
            .await
            .with_context(|| format!("{} request refused", what))?;
    }
    Ok(())
}

async fn start_client(args: &Args, handle: &ChannelHandle) -> Result<()> {
    if args.pty {
        let pty = PtyRequest::new(args.term.clone(), TerminalSize::default());
        expect_success(handle.request("pty-req", pty.encode()?, true)?, "pty-req").await?;
    }

    match (&args.command, &args.subsystem) {
        (Some(command), _) => {
            let exec = ExecRequest {
                command: command.clone(),
            };
            expect_success(handle.request("exec", exec.encode()?, true)?, "exec").await
        }
        (None, Some(name)) => {
            let subsystem = SubsystemRequest { name: name.clone() };
            expect_success(handle.request("subsystem", subsystem.encode()?, true)?, "subsystem")
                .await
        }
        (None, None) => anyhow::bail!("Either --command or --subsystem is required"),
    }
}

/// Copy session output until the channel closes
///
/// Returns the exit status reported by the server, if any.
async fn relay_events<O, E>(
    events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
    stdout: &mut O,
    stderr: &mut E,
) -> Result<Option<u32>>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let exit_status_request = canonical_name("exit-status");
    let mut exit_status = None;

    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Data(data) => stdout.write_all(&data).await?,
            ChannelEvent::ExtendedData { data, .. } => stderr.write_all(&data).await?,
            ChannelEvent::Request { request_type, data } if request_type == exit_status_request => {
                exit_status = Some(ExitStatus::decode(data)?.code);
            }
            ChannelEvent::Closed => break,
            other => tracing::debug!("Session event: {:?}", other),
        }
    }
    stdout.flush().await?;
    stderr.flush().await?;

    Ok(exit_status)
}

/// Process exit code for a remote exit status
fn exit_code(status: Option<u32>) -> i32 {
    status.map_or(0, |code| i32::try_from(code).unwrap_or(i32::MAX))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if args.command.is_none() && args.subsystem.is_none() {
        anyhow::bail!("Either --command or --subsystem is required");
    }

    let config: MuxConfig = match &args.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => MuxConfig::default(),
    };
    config.validate()?;

    let spawner = Arc::new(PtySpawner::new(&config.session.shell)?);
    let subsystems = SubsystemRegistry::new().with("echo", Echo::start);
    let factory = SessionFactory::new(config.clone(), spawner).with_subsystems(subsystems);

    // Two multiplexers wired back to back
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    let server = Multiplexer::new(server_tx, factory);
    let client = Multiplexer::new(client_tx, RejectAllFactory);
    let server_mux = server.handle();
    let client_mux = client.handle();
    let server_task = tokio::spawn(server.run(server_rx));
    let client_task = tokio::spawn(client.run(client_rx));

    let (channel, mut events) = ForwardingChannel::pair("session");
    let channel = channel.with_window(config.channel.window_size, config.channel.max_packet);
    let handle = client_mux
        .open_channel(channel, Bytes::new())?
        .await
        .context("Session channel refused")?;
    tracing::info!("Session open as {}", handle.id());

    start_client(&args, &handle).await?;

    if let Some(input) = &args.input {
        handle.write(input.clone().into_bytes()).await?;
    }
    handle.send_eof()?;

    let exit_status =
        relay_events(&mut events, &mut tokio::io::stdout(), &mut tokio::io::stderr()).await?;

    client_mux.shutdown();
    server_mux.shutdown();
    client_task.await??;
    server_task.await??;

    let code = exit_code(exit_status);
    tracing::info!("Session finished with status {}", code);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshmux::Channel;

    #[tokio::test]
    async fn test_relay_reports_exit_status() {
        let (mut channel, mut events) = ForwardingChannel::pair("session");
        channel.data_received(Bytes::from_static(b"out"));
        channel.extended_data_received(1, Bytes::from_static(b"err"));
        channel.request_received("exit-status", ExitStatus { code: 7 }.encode());
        channel.eof_received();
        channel.closed();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let status = relay_events(&mut events, &mut stdout, &mut stderr)
            .await
            .unwrap();

        assert_eq!(status, Some(7));
        assert_eq!(stdout, b"out");
        assert_eq!(stderr, b"err");
        assert_eq!(exit_code(status), 7);
    }

    #[tokio::test]
    async fn test_relay_without_status() {
        let (mut channel, mut events) = ForwardingChannel::pair("session");
        channel.closed();

        let status = relay_events(&mut events, &mut Vec::new(), &mut Vec::new())
            .await
            .unwrap();

        assert_eq!(status, None);
        assert_eq!(exit_code(status), 0);
        assert_eq!(exit_code(Some(u32::MAX)), i32::MAX);
    }
}

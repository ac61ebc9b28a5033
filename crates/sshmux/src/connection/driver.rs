//! Async driver for a [`Connection`]
//!
//! One task owns the connection and processes inbound packets and queued
//! handle commands one at a time, so every message is fully handled before
//! the next one is looked at.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sshmux_core::traits::{Channel, ChannelFactory, Transport};
use sshmux_core::{Command, MuxError, PendingOpen, PendingReply};
use sshmux_protocol::Packet;

use super::Connection;

/// Runs a [`Connection`] until the transport closes, a fatal error occurs or
/// shutdown is requested
pub struct Multiplexer<T: Transport> {
    connection: Connection<T>,
    commands: mpsc::UnboundedReceiver<Command>,
    handle: MuxHandle,
}

impl<T: Transport> Multiplexer<T> {
    /// Create a multiplexer sending over `transport`
    pub fn new(transport: T, factory: impl ChannelFactory + 'static) -> Self {
        let (connection, commands) = Connection::new(transport, factory);
        let handle = MuxHandle {
            commands: connection.command_sender(),
            cancel: CancellationToken::new(),
        };

        Self {
            connection,
            commands,
            handle,
        }
    }

    /// Handle for opening channels and sending global requests
    pub fn handle(&self) -> MuxHandle {
        self.handle.clone()
    }

    /// Access the connection before the driver starts (e.g. to register
    /// global request handlers)
    pub fn connection_mut(&mut self) -> &mut Connection<T> {
        &mut self.connection
    }

    /// Process inbound packets and handle commands until the end
    ///
    /// Returns the fatal error that ended the connection, if any. Every
    /// channel is closed and every pending completion cancelled on exit.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<Packet>) -> Result<(), MuxError> {
        let cancel = self.handle.cancel.clone();

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Multiplexer shutdown requested");
                    break Ok(());
                }
                packet = inbound.recv() => {
                    let Some(packet) = packet else {
                        tracing::info!("Transport closed");
                        break Ok(());
                    };
                    if let Err(e) = self.connection.dispatch(packet) {
                        if e.is_fatal() {
                            tracing::error!("Protocol violation, dropping connection: {}", e);
                            break Err(e);
                        }
                        tracing::warn!("Inbound message not applied: {}", e);
                    }
                }
                Some(command) = self.commands.recv() => {
                    if let Err(e) = self.connection.apply(command) {
                        if e.is_fatal() {
                            tracing::error!("Connection failed: {}", e);
                            break Err(e);
                        }
                        tracing::debug!("Command not applied: {}", e);
                    }
                }
            }
        };

        self.connection.shutdown();
        result
    }
}

/// Cloneable handle to a running [`Multiplexer`]
#[derive(Debug, Clone)]
pub struct MuxHandle {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl MuxHandle {
    fn submit(&self, command: Command) -> Result<(), MuxError> {
        self.commands
            .send(command)
            .map_err(|_| MuxError::Disconnected)
    }

    /// Open `channel` to the peer
    ///
    /// The returned handle resolves to a [`ChannelHandle`](sshmux_core::ChannelHandle)
    /// once the peer confirms.
    pub fn open_channel(
        &self,
        channel: impl Channel + 'static,
        extra: impl Into<Bytes>,
    ) -> Result<PendingOpen, MuxError> {
        let (reply, pending) = PendingOpen::channel();
        self.submit(Command::Open {
            channel: Box::new(channel),
            extra: extra.into(),
            reply,
        })?;
        Ok(pending)
    }

    /// Send a global request
    pub fn global_request(
        &self,
        request_type: impl Into<String>,
        data: impl Into<Bytes>,
        want_reply: bool,
    ) -> Result<Option<PendingReply>, MuxError> {
        let (reply, pending) = if want_reply {
            let (tx, pending) = PendingReply::channel();
            (Some(tx), Some(pending))
        } else {
            (None, None)
        };

        self.submit(Command::GlobalRequest {
            request_type: request_type.into(),
            data: data.into(),
            reply,
        })?;
        Ok(pending)
    }

    /// Stop the multiplexer
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelEvent, ForwardingChannel};
    use crate::factory::RejectAllFactory;
    use sshmux_core::{OpenError, RequestError};
    use sshmux_protocol::Message;

    fn spawn_against_wire() -> (
        MuxHandle,
        mpsc::UnboundedSender<Packet>,
        mpsc::UnboundedReceiver<Packet>,
        tokio::task::JoinHandle<Result<(), MuxError>>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let mux = Multiplexer::new(out_tx, RejectAllFactory);
        let handle = mux.handle();
        let task = tokio::spawn(mux.run(in_rx));
        (handle, in_tx, out_rx, task)
    }

    async fn next_message(wire: &mut mpsc::UnboundedReceiver<Packet>) -> Message {
        Message::decode(wire.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_open_through_handle() {
        let (mux, peer, mut wire, _task) = spawn_against_wire();
        let (channel, mut events) = ForwardingChannel::pair("session");

        let pending = mux.open_channel(channel, Bytes::new()).unwrap();
        assert!(matches!(
            next_message(&mut wire).await,
            Message::ChannelOpen { sender_channel: 0, .. }
        ));

        peer.send(
            Message::ChannelOpenConfirmation {
                recipient_channel: 0,
                sender_channel: 4,
                window_size: 64,
                max_packet: 32,
                data: Bytes::new(),
            }
            .encode()
            .unwrap(),
        )
        .unwrap();

        let handle = pending.await.unwrap();
        assert!(matches!(events.recv().await, Some(ChannelEvent::Opened { .. })));

        handle.write(vec![5u8; 40]).await.unwrap();
        assert!(matches!(
            next_message(&mut wire).await,
            Message::ChannelData { recipient_channel: 4, data } if data.len() == 32
        ));
        assert!(matches!(
            next_message(&mut wire).await,
            Message::ChannelData { recipient_channel: 4, data } if data.len() == 8
        ));
    }

    #[tokio::test]
    async fn test_fatal_error_ends_run() {
        let (mux, peer, _wire, task) = spawn_against_wire();
        let pending = mux
            .global_request("tcpip-forward", Bytes::new(), true)
            .unwrap()
            .unwrap();
        tokio::task::yield_now().await;

        peer.send(
            Message::ChannelEof {
                recipient_channel: 99,
            }
            .encode()
            .unwrap(),
        )
        .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(MuxError::UnknownChannel { channel: 99, .. })));
        assert_eq!(pending.await, Err(RequestError::Cancelled));
        assert!(matches!(
            mux.open_channel(ForwardingChannel::pair("session").0, Bytes::new()),
            Err(MuxError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_open() {
        let (mux, _peer, mut wire, task) = spawn_against_wire();

        let pending = mux
            .open_channel(ForwardingChannel::pair("session").0, Bytes::new())
            .unwrap();
        next_message(&mut wire).await;

        mux.shutdown();
        assert!(mux.is_shutdown());
        assert!(task.await.unwrap().is_ok());
        assert!(matches!(pending.await, Err(OpenError::Cancelled)));
    }

    #[tokio::test]
    async fn test_transport_close_ends_run() {
        let (_mux, peer, _wire, task) = spawn_against_wire();
        drop(peer);
        assert!(task.await.unwrap().is_ok());
    }
}

//! Application-facing handle to an open channel

use std::sync::Arc;

use bytes::Bytes;
use sshmux_protocol::ChannelId;
use tokio::sync::mpsc;

use crate::command::Command;
use crate::error::ChannelError;
use crate::pending::PendingReply;
use crate::window::Window;

/// Cloneable handle for sending on one channel
///
/// Every operation is queued to the multiplexer task. Writes reserve send
/// credit first and are split so that no single message exceeds the peer's
/// maximum packet size or the credit currently granted.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    window: Arc<Window>,
    max_packet: u32,
    commands: mpsc::UnboundedSender<Command>,
}

impl ChannelHandle {
    /// Create a handle for `id`
    pub fn new(
        id: ChannelId,
        window: Arc<Window>,
        max_packet: u32,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            window,
            max_packet,
            commands,
        }
    }

    /// Local channel id
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Send credit currently available
    pub fn window_left(&self) -> u32 {
        self.window.available()
    }

    /// Largest data payload the peer accepts in one message
    pub fn max_packet(&self) -> u32 {
        self.max_packet
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.window.is_closed()
    }

    fn chunk_limit(&self) -> usize {
        self.max_packet.max(1) as usize
    }

    fn submit(&self, command: Command) -> Result<(), ChannelError> {
        self.commands
            .send(command)
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Write `data`, waiting for window credit as needed
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), ChannelError> {
        self.write_inner(None, data.into()).await
    }

    /// Write typed data (e.g. stderr), waiting for window credit as needed
    pub async fn write_extended(
        &self,
        data_type: u32,
        data: impl Into<Bytes>,
    ) -> Result<(), ChannelError> {
        self.write_inner(Some(data_type), data.into()).await
    }

    async fn write_inner(&self, data_type: Option<u32>, mut data: Bytes) -> Result<(), ChannelError> {
        while !data.is_empty() {
            let granted = self
                .window
                .reserve(data.len().min(self.chunk_limit()))
                .await?;
            let chunk = data.split_to(granted);
            self.submit(self.data_command(data_type, chunk))?;
        }
        Ok(())
    }

    /// Send as much of `data` as the current credit allows, without waiting
    ///
    /// Returns the number of bytes queued; the caller keeps the rest.
    pub fn try_write(&self, data: impl Into<Bytes>) -> Result<usize, ChannelError> {
        let mut data = data.into();
        let mut sent = 0;

        while !data.is_empty() {
            let granted = self
                .window
                .try_reserve(data.len().min(self.chunk_limit()))?;
            if granted == 0 {
                break;
            }
            let chunk = data.split_to(granted);
            self.submit(self.data_command(None, chunk))?;
            sent += granted;
        }

        Ok(sent)
    }

    fn data_command(&self, data_type: Option<u32>, data: Bytes) -> Command {
        match data_type {
            Some(data_type) => Command::ExtendedData {
                channel: self.id,
                data_type,
                data,
            },
            None => Command::Data {
                channel: self.id,
                data,
            },
        }
    }

    /// Signal that no more data will be sent
    pub fn send_eof(&self) -> Result<(), ChannelError> {
        self.submit(Command::Eof { channel: self.id })
    }

    /// Send a channel request
    ///
    /// With `want_reply` the returned handle resolves when the peer answers.
    pub fn request(
        &self,
        request_type: impl Into<String>,
        data: impl Into<Bytes>,
        want_reply: bool,
    ) -> Result<Option<PendingReply>, ChannelError> {
        let (reply, pending) = if want_reply {
            let (tx, pending) = PendingReply::channel();
            (Some(tx), Some(pending))
        } else {
            (None, None)
        };

        self.submit(Command::Request {
            channel: self.id,
            request_type: request_type.into(),
            data: data.into(),
            reply,
        })?;

        Ok(pending)
    }

    /// Grant the peer `bytes` more receive credit
    pub fn adjust_window(&self, bytes: u32) -> Result<(), ChannelError> {
        self.submit(Command::AdjustWindow {
            channel: self.id,
            bytes,
        })
    }

    /// Close the channel
    ///
    /// Closing twice is harmless; the multiplexer sends a single CLOSE.
    pub fn close(&self) -> Result<(), ChannelError> {
        self.submit(Command::Close { channel: self.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle_with_window(window: u32, max_packet: u32) -> (ChannelHandle, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ChannelId::new(0);
        let handle = ChannelHandle::new(id, Arc::new(Window::new(id, window)), max_packet, tx);
        (handle, rx)
    }

    fn drain_data(rx: &mut mpsc::UnboundedReceiver<Command>) -> Vec<usize> {
        let mut sizes = Vec::new();
        while let Ok(command) = rx.try_recv() {
            if let Command::Data { data, .. } = command {
                sizes.push(data.len());
            }
        }
        sizes
    }

    #[tokio::test]
    async fn test_write_splits_by_max_packet() {
        let (handle, mut rx) = handle_with_window(1000, 100);

        handle.write(vec![0u8; 250]).await.unwrap();

        assert_eq!(drain_data(&mut rx), vec![100, 100, 50]);
        assert_eq!(handle.window_left(), 750);
    }

    #[tokio::test]
    async fn test_write_never_exceeds_credit() {
        let (handle, mut rx) = handle_with_window(100, 1000);

        let writer = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.write(vec![1u8; 300]).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(drain_data(&mut rx), vec![100]);
        assert!(!writer.is_finished());

        handle.window.add_window_bytes(500).unwrap();
        writer.await.unwrap().unwrap();

        assert_eq!(drain_data(&mut rx), vec![200]);
        assert_eq!(handle.window_left(), 300);
    }

    #[test]
    fn test_try_write_sends_only_available_credit() {
        let (handle, mut rx) = handle_with_window(40, 16);

        let sent = handle.try_write(vec![7u8; 100]).unwrap();

        assert_eq!(sent, 40);
        assert_eq!(drain_data(&mut rx), vec![16, 16, 8]);
    }

    #[test]
    fn test_request_without_reply() {
        let (handle, mut rx) = handle_with_window(0, 16);

        let pending = handle.request("shell", Bytes::new(), false).unwrap();
        assert!(pending.is_none());

        match rx.try_recv().unwrap() {
            Command::Request {
                request_type,
                reply,
                ..
            } => {
                assert_eq!(request_type, "shell");
                assert!(reply.is_none());
            }
            other => panic!("Expected Request command, got {:?}", other),
        }
    }

    #[test]
    fn test_disconnected_multiplexer() {
        let (handle, rx) = handle_with_window(10, 16);
        drop(rx);

        assert_eq!(handle.send_eof(), Err(ChannelError::Disconnected));
    }
}

//! Channel multiplexing over a single transport
//!
//! [`Connection`] is the synchronous heart of the multiplexer. It owns the
//! channel table, the request registry and the global request handlers,
//! decodes every inbound message and routes it, and is the only place where
//! outbound channel messages are encoded and handed to the transport.
//!
//! Nothing here blocks. Application code that needs to wait (for window
//! credit, for a reply) does so on a [`ChannelHandle`] or completion handle
//! while the connection keeps processing messages.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use sshmux_core::pending::{OpenSender, ReplySender};
use sshmux_core::traits::{
    canonical_name, Channel, ChannelFactory, GlobalReply, GlobalRequestHandler, Transport,
};
use sshmux_core::{
    ChannelHandle, Command, MuxError, OpenError, PendingOpen, PendingReply, RequestId, Window,
};
use sshmux_protocol::{ChannelId, Message, MessageType, OpenFailureReason, Packet};

use crate::registry::{PendingKey, RequestRegistry};

/// Lifecycle state of a registered channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// CHANNEL_OPEN sent, waiting for the peer's answer
    Opening,
    /// Confirmed; `remote_id` addresses the channel in outbound messages
    Open { remote_id: u32 },
    /// Our CLOSE has been sent, waiting for the peer's CLOSE
    Closing,
}

struct ChannelEntry {
    state: ChannelState,
    handler: Box<dyn Channel>,
    /// Credit for sending to the peer
    window: Arc<Window>,
    remote_max_packet: u32,
    /// Window we advertised and how much of it the peer has left
    local_window_size: u32,
    local_window_left: u32,
    open_reply: Option<OpenSender>,
    close_when_confirmed: bool,
}

impl ChannelEntry {
    fn remote_id(&self) -> Option<u32> {
        match self.state {
            ChannelState::Open { remote_id } => Some(remote_id),
            ChannelState::Opening | ChannelState::Closing => None,
        }
    }
}

/// Connection-protocol multiplexer for one transport
pub struct Connection<T: Transport> {
    transport: T,
    factory: Box<dyn ChannelFactory>,
    channels: HashMap<ChannelId, ChannelEntry>,
    /// `None` once the 32-bit id space is used up
    next_local_id: Option<ChannelId>,
    requests: RequestRegistry,
    global_handlers: HashMap<String, Box<dyn GlobalRequestHandler>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl<T: Transport> Connection<T> {
    /// Create a connection over `transport`
    ///
    /// Returns the receiver for commands queued by channel handles; the
    /// owner feeds them back through [`apply`](Self::apply).
    pub fn new(
        transport: T,
        factory: impl ChannelFactory + 'static,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, receiver) = mpsc::unbounded_channel();

        let connection = Self {
            transport,
            factory: Box::new(factory),
            channels: HashMap::new(),
            next_local_id: Some(ChannelId::new(0)),
            requests: RequestRegistry::new(),
            global_handlers: HashMap::new(),
            commands,
        };

        (connection, receiver)
    }

    /// Sender for commands addressed to this connection
    pub fn command_sender(&self) -> mpsc::UnboundedSender<Command> {
        self.commands.clone()
    }

    /// Register the handler for a global request type
    pub fn register_global_handler(
        &mut self,
        request_type: &str,
        handler: impl GlobalRequestHandler + 'static,
    ) {
        self.global_handlers
            .insert(canonical_name(request_type), Box::new(handler));
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// State of a registered channel
    pub fn channel_state(&self, id: ChannelId) -> Option<ChannelState> {
        self.channels.get(&id).map(|entry| entry.state)
    }

    /// Peer's id for an open channel
    pub fn remote_id(&self, id: ChannelId) -> Option<u32> {
        self.channels.get(&id).and_then(ChannelEntry::remote_id)
    }

    /// Send credit left on a channel
    pub fn window_left(&self, id: ChannelId) -> Option<u32> {
        self.channels.get(&id).map(|entry| entry.window.available())
    }

    /// Handle for an open channel
    pub fn channel_handle(&self, id: ChannelId) -> Option<ChannelHandle> {
        let entry = self.channels.get(&id)?;
        entry.remote_id()?;
        Some(self.make_handle(id, entry))
    }

    /// Number of registered channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of replies still awaited on a channel
    pub fn pending_requests(&self, id: ChannelId) -> usize {
        self.requests.outstanding(PendingKey::Channel(id))
    }

    fn make_handle(&self, id: ChannelId, entry: &ChannelEntry) -> ChannelHandle {
        ChannelHandle::new(
            id,
            Arc::clone(&entry.window),
            entry.remote_max_packet,
            self.commands.clone(),
        )
    }

    fn allocate_id(&mut self) -> Result<ChannelId, MuxError> {
        let id = self.next_local_id.ok_or(MuxError::ChannelIdsExhausted)?;
        self.next_local_id = id.next();
        Ok(id)
    }

    fn send(&mut self, message: Message) -> Result<(), MuxError> {
        let packet = message.encode()?;
        tracing::trace!("-> {:?}", message.message_type());
        self.transport.send(packet)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound operations
    // ------------------------------------------------------------------

    /// Open a channel to the peer
    ///
    /// The channel is registered as opening under a fresh local id and
    /// CHANNEL_OPEN is sent. The returned handle resolves once the peer
    /// confirms or refuses.
    pub fn open_channel(
        &mut self,
        channel: Box<dyn Channel>,
        extra: Bytes,
    ) -> Result<(ChannelId, PendingOpen), MuxError> {
        let (reply, pending) = PendingOpen::channel();
        let id = self.open_with_reply(channel, extra, reply)?;
        Ok((id, pending))
    }

    fn open_with_reply(
        &mut self,
        channel: Box<dyn Channel>,
        extra: Bytes,
        reply: OpenSender,
    ) -> Result<ChannelId, MuxError> {
        let id = self.allocate_id()?;

        let message = Message::ChannelOpen {
            channel_type: channel.channel_type().to_string(),
            sender_channel: id.as_u32(),
            window_size: channel.window_size(),
            max_packet: channel.max_packet(),
            data: extra,
        };

        let local_window_size = channel.window_size();
        self.channels.insert(
            id,
            ChannelEntry {
                state: ChannelState::Opening,
                handler: channel,
                window: Arc::new(Window::new(id, 0)),
                remote_max_packet: 0,
                local_window_size,
                local_window_left: local_window_size,
                open_reply: Some(reply),
                close_when_confirmed: false,
            },
        );

        tracing::debug!("Opening {}", id);
        if let Err(e) = self.send(message) {
            self.channels.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    fn open_remote_id(&self, id: ChannelId) -> Result<u32, MuxError> {
        self.channels
            .get(&id)
            .and_then(ChannelEntry::remote_id)
            .ok_or(MuxError::NoSuchChannel(id))
    }

    /// Send channel data
    ///
    /// Flow control is the caller's job; see [`ChannelHandle::write`].
    pub fn send_data(&mut self, id: ChannelId, data: Bytes) -> Result<(), MuxError> {
        let remote = self.open_remote_id(id)?;
        self.send(Message::ChannelData {
            recipient_channel: remote,
            data,
        })
    }

    /// Send typed channel data
    pub fn send_extended_data(
        &mut self,
        id: ChannelId,
        data_type: u32,
        data: Bytes,
    ) -> Result<(), MuxError> {
        let remote = self.open_remote_id(id)?;
        self.send(Message::ChannelExtendedData {
            recipient_channel: remote,
            data_type,
            data,
        })
    }

    /// Tell the peer no more data will be sent on a channel
    pub fn send_eof(&mut self, id: ChannelId) -> Result<(), MuxError> {
        let remote = self.open_remote_id(id)?;
        self.send(Message::ChannelEof {
            recipient_channel: remote,
        })
    }

    /// Send a channel request
    ///
    /// With `want_reply` the pending entry is registered before the request
    /// is transmitted; several requests may be outstanding on one channel.
    pub fn send_request(
        &mut self,
        id: ChannelId,
        request_type: &str,
        data: Bytes,
        want_reply: bool,
    ) -> Result<Option<PendingReply>, MuxError> {
        if want_reply {
            let (tx, pending) = PendingReply::channel();
            self.request_with_reply(id, request_type, data, Some(tx))?;
            Ok(Some(pending))
        } else {
            self.request_with_reply(id, request_type, data, None)?;
            Ok(None)
        }
    }

    fn request_with_reply(
        &mut self,
        id: ChannelId,
        request_type: &str,
        data: Bytes,
        reply: Option<ReplySender>,
    ) -> Result<Option<RequestId>, MuxError> {
        let remote = self.open_remote_id(id)?;
        let want_reply = reply.is_some();

        let request_id =
            reply.map(|reply| self.requests.register_sender(PendingKey::Channel(id), reply));

        tracing::debug!("Sending request {} on {}", request_type, id);
        self.send(Message::ChannelRequest {
            recipient_channel: remote,
            request_type: request_type.to_string(),
            want_reply,
            data,
        })?;

        Ok(request_id)
    }

    /// Send a global request
    pub fn send_global_request(
        &mut self,
        request_type: &str,
        data: Bytes,
        want_reply: bool,
    ) -> Result<Option<PendingReply>, MuxError> {
        if want_reply {
            let (tx, pending) = PendingReply::channel();
            self.global_request_with_reply(request_type, data, Some(tx))?;
            Ok(Some(pending))
        } else {
            self.global_request_with_reply(request_type, data, None)?;
            Ok(None)
        }
    }

    fn global_request_with_reply(
        &mut self,
        request_type: &str,
        data: Bytes,
        reply: Option<ReplySender>,
    ) -> Result<(), MuxError> {
        let want_reply = reply.is_some();
        if let Some(reply) = reply {
            self.requests.register_sender(PendingKey::Global, reply);
        }

        self.send(Message::GlobalRequest {
            request_type: request_type.to_string(),
            want_reply,
            data,
        })
    }

    /// Grant the peer more receive credit on a channel
    pub fn adjust_window(&mut self, id: ChannelId, bytes: u32) -> Result<(), MuxError> {
        let remote = self.open_remote_id(id)?;
        let entry = self
            .channels
            .get_mut(&id)
            .ok_or(MuxError::NoSuchChannel(id))?;

        // The peer's counter is 32 bits too; never grant past it
        let bytes = bytes.min(u32::MAX - entry.local_window_left);
        if bytes == 0 {
            return Ok(());
        }
        entry.local_window_left += bytes;

        self.send(Message::ChannelWindowAdjust {
            recipient_channel: remote,
            bytes_to_add: bytes,
        })
    }

    /// Close a channel
    ///
    /// Sends CLOSE and stops all further sending on the channel: writers are
    /// woken with an error and pending requests are cancelled. The channel
    /// stays registered until the peer's CLOSE arrives. Closing a channel
    /// that is already closing sends nothing; closing one that is no longer
    /// registered fails with [`MuxError::NoSuchChannel`].
    pub fn send_close(&mut self, id: ChannelId) -> Result<(), MuxError> {
        let entry = self
            .channels
            .get_mut(&id)
            .ok_or(MuxError::NoSuchChannel(id))?;

        match entry.state {
            ChannelState::Closing => {
                tracing::debug!("{} already closing", id);
                Ok(())
            }
            ChannelState::Opening => {
                tracing::debug!("{} will close once the peer confirms it", id);
                entry.close_when_confirmed = true;
                Ok(())
            }
            ChannelState::Open { remote_id } => {
                entry.state = ChannelState::Closing;
                entry.window.close();
                let cancelled = self.requests.cancel(PendingKey::Channel(id));
                if cancelled > 0 {
                    tracing::debug!("Cancelled {} pending requests on {}", cancelled, id);
                }

                tracing::debug!("Closing {}", id);
                self.send(Message::ChannelClose {
                    recipient_channel: remote_id,
                })
            }
        }
    }

    /// Apply a command queued by a handle
    pub fn apply(&mut self, command: Command) -> Result<(), MuxError> {
        match command {
            Command::Open {
                channel,
                extra,
                reply,
            } => self.open_with_reply(channel, extra, reply).map(|_| ()),
            Command::GlobalRequest {
                request_type,
                data,
                reply,
            } => self.global_request_with_reply(&request_type, data, reply),
            Command::Data { channel, data } => self.send_data(channel, data),
            Command::ExtendedData {
                channel,
                data_type,
                data,
            } => self.send_extended_data(channel, data_type, data),
            Command::Eof { channel } => self.send_eof(channel),
            Command::Close { channel } => match self.send_close(channel) {
                Err(MuxError::NoSuchChannel(_)) => {
                    tracing::debug!("Close for {} after it was removed", channel);
                    Ok(())
                }
                result => result,
            },
            Command::Request {
                channel,
                request_type,
                data,
                reply,
            } => self
                .request_with_reply(channel, &request_type, data, reply)
                .map(|_| ()),
            Command::AdjustWindow { channel, bytes } => self.adjust_window(channel, bytes),
        }
    }

    /// Tear down every channel and cancel everything pending
    ///
    /// Used when the transport goes away or a fatal error ends the
    /// connection. Each registered channel gets `closed()`.
    pub fn shutdown(&mut self) {
        let count = self.channels.len();

        for (id, mut entry) in self.channels.drain() {
            entry.window.close();
            if let Some(reply) = entry.open_reply.take() {
                let _ = reply.send(Err(OpenError::Cancelled));
            }
            tracing::debug!("{} closed by connection shutdown", id);
            entry.handler.closed();
        }

        let cancelled = self.requests.cancel_all();
        if count > 0 || cancelled > 0 {
            tracing::info!(
                "Connection shut down ({} channels closed, {} requests cancelled)",
                count,
                cancelled
            );
        }
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    /// Process one message delivered by the transport
    ///
    /// Errors for which [`MuxError::is_fatal`] holds are protocol violations
    /// and the connection must be dropped. The message is fully decoded
    /// before any state changes.
    pub fn dispatch(&mut self, packet: Packet) -> Result<(), MuxError> {
        let message = Message::decode(packet)?;
        tracing::trace!("<- {:?}", message.message_type());

        match message {
            Message::GlobalRequest {
                request_type,
                want_reply,
                data,
            } => self.on_global_request(&request_type, want_reply, data),
            Message::RequestSuccess { data } => {
                if self.requests.succeed(PendingKey::Global, data).is_none() {
                    tracing::debug!("Dropping REQUEST_SUCCESS with no pending global request");
                }
                Ok(())
            }
            Message::RequestFailure => {
                if self.requests.fail(PendingKey::Global).is_none() {
                    tracing::debug!("Dropping REQUEST_FAILURE with no pending global request");
                }
                Ok(())
            }
            Message::ChannelOpen {
                channel_type,
                sender_channel,
                window_size,
                max_packet,
                data,
            } => self.on_channel_open(&channel_type, sender_channel, window_size, max_packet, data),
            Message::ChannelOpenConfirmation {
                recipient_channel,
                sender_channel,
                window_size,
                max_packet,
                data,
            } => self.on_open_confirmation(
                recipient_channel,
                sender_channel,
                window_size,
                max_packet,
                data,
            ),
            Message::ChannelOpenFailure {
                recipient_channel,
                reason_code,
                description,
                ..
            } => self.on_open_failure(recipient_channel, reason_code, description),
            Message::ChannelWindowAdjust {
                recipient_channel,
                bytes_to_add,
            } => {
                let id = self.inbound_channel(MessageType::ChannelWindowAdjust, recipient_channel)?;
                let entry = self.entry_mut(id)?;
                if entry.state == ChannelState::Closing {
                    return Ok(());
                }
                let left = entry.window.add_window_bytes(bytes_to_add)?;
                tracing::trace!("{} window +{} = {}", id, bytes_to_add, left);
                Ok(())
            }
            Message::ChannelData {
                recipient_channel,
                data,
            } => self.on_data(MessageType::ChannelData, recipient_channel, None, data),
            Message::ChannelExtendedData {
                recipient_channel,
                data_type,
                data,
            } => self.on_data(
                MessageType::ChannelExtendedData,
                recipient_channel,
                Some(data_type),
                data,
            ),
            Message::ChannelEof { recipient_channel } => {
                let id = self.inbound_channel(MessageType::ChannelEof, recipient_channel)?;
                let entry = self.entry_mut(id)?;
                if entry.state != ChannelState::Closing {
                    entry.handler.eof_received();
                }
                Ok(())
            }
            Message::ChannelClose { recipient_channel } => self.on_close(recipient_channel),
            Message::ChannelRequest {
                recipient_channel,
                request_type,
                want_reply,
                data,
            } => self.on_channel_request(recipient_channel, &request_type, want_reply, data),
            Message::ChannelSuccess { recipient_channel } => {
                let key = PendingKey::Channel(ChannelId::new(recipient_channel));
                if self.requests.succeed(key, Bytes::new()).is_none() {
                    tracing::debug!(
                        "Dropping CHANNEL_SUCCESS for channel {} with no pending request",
                        recipient_channel
                    );
                }
                Ok(())
            }
            Message::ChannelFailure { recipient_channel } => {
                let key = PendingKey::Channel(ChannelId::new(recipient_channel));
                if self.requests.fail(key).is_none() {
                    tracing::debug!(
                        "Dropping CHANNEL_FAILURE for channel {} with no pending request",
                        recipient_channel
                    );
                }
                Ok(())
            }
        }
    }

    fn entry_mut(&mut self, id: ChannelId) -> Result<&mut ChannelEntry, MuxError> {
        self.channels
            .get_mut(&id)
            .ok_or(MuxError::NoSuchChannel(id))
    }

    /// Resolve the recipient of a peer message that requires a confirmed
    /// channel
    fn inbound_channel(
        &self,
        message_type: MessageType,
        recipient: u32,
    ) -> Result<ChannelId, MuxError> {
        let id = ChannelId::new(recipient);
        let entry = self.channels.get(&id).ok_or(MuxError::UnknownChannel {
            message_type,
            channel: recipient,
        })?;

        if entry.state == ChannelState::Opening {
            return Err(MuxError::ChannelNotOpen {
                message_type,
                channel: id,
            });
        }
        Ok(id)
    }

    fn on_global_request(
        &mut self,
        request_type: &str,
        want_reply: bool,
        data: Bytes,
    ) -> Result<(), MuxError> {
        let reply = match self.global_handlers.get_mut(&canonical_name(request_type)) {
            Some(handler) => handler.handle(data),
            None => {
                tracing::debug!("Unhandled global request {}", request_type);
                GlobalReply::Rejected
            }
        };

        if !want_reply {
            return Ok(());
        }

        match reply {
            GlobalReply::Accepted(data) => self.send(Message::RequestSuccess { data }),
            GlobalReply::Rejected => self.send(Message::RequestFailure),
        }
    }

    fn on_channel_open(
        &mut self,
        channel_type: &str,
        sender_channel: u32,
        window_size: u32,
        max_packet: u32,
        data: Bytes,
    ) -> Result<(), MuxError> {
        if self.next_local_id.is_none() {
            tracing::warn!("Refusing {} channel: local ids exhausted", channel_type);
            return self.send(Message::ChannelOpenFailure {
                recipient_channel: sender_channel,
                reason_code: OpenFailureReason::ResourceShortage.as_u32(),
                description: "channel ids exhausted".to_string(),
                language: String::new(),
            });
        }

        let handler = match self
            .factory
            .create(channel_type, window_size, max_packet, data)
        {
            Ok(handler) => handler,
            Err(rejection) => {
                tracing::info!(
                    "Refused {} channel from peer channel {}: {}",
                    channel_type,
                    sender_channel,
                    rejection.description
                );
                return self.send(Message::ChannelOpenFailure {
                    recipient_channel: sender_channel,
                    reason_code: rejection.reason_code,
                    description: rejection.description,
                    language: String::new(),
                });
            }
        };

        let id = self.allocate_id()?;
        let local_window_size = handler.window_size();
        let confirmation = Message::ChannelOpenConfirmation {
            recipient_channel: sender_channel,
            sender_channel: id.as_u32(),
            window_size: local_window_size,
            max_packet: handler.max_packet(),
            data: handler.confirmation_data(),
        };

        self.channels.insert(
            id,
            ChannelEntry {
                state: ChannelState::Open {
                    remote_id: sender_channel,
                },
                handler,
                window: Arc::new(Window::new(id, window_size)),
                remote_max_packet: max_packet,
                local_window_size,
                local_window_left: local_window_size,
                open_reply: None,
                close_when_confirmed: false,
            },
        );

        self.send(confirmation)?;
        tracing::info!(
            "Accepted {} channel as {} (peer channel {})",
            channel_type,
            id,
            sender_channel
        );

        let commands = self.commands.clone();
        let entry = self.entry_mut(id)?;
        let handle = ChannelHandle::new(
            id,
            Arc::clone(&entry.window),
            entry.remote_max_packet,
            commands,
        );
        entry.handler.opened(handle, Bytes::new());
        Ok(())
    }

    fn opening_entry(
        &mut self,
        message_type: MessageType,
        recipient: u32,
    ) -> Result<ChannelId, MuxError> {
        let id = ChannelId::new(recipient);
        let entry = self.channels.get(&id).ok_or(MuxError::UnknownChannel {
            message_type,
            channel: recipient,
        })?;

        if entry.state != ChannelState::Opening {
            return Err(MuxError::ChannelNotOpen {
                message_type,
                channel: id,
            });
        }
        Ok(id)
    }

    fn on_open_confirmation(
        &mut self,
        recipient: u32,
        sender_channel: u32,
        window_size: u32,
        max_packet: u32,
        data: Bytes,
    ) -> Result<(), MuxError> {
        let id = self.opening_entry(MessageType::ChannelOpenConfirmation, recipient)?;
        let commands = self.commands.clone();
        let entry = self.entry_mut(id)?;

        entry.state = ChannelState::Open {
            remote_id: sender_channel,
        };
        entry.remote_max_packet = max_packet;
        entry.window.add_window_bytes(window_size)?;

        if entry.close_when_confirmed {
            if let Some(reply) = entry.open_reply.take() {
                let _ = reply.send(Err(OpenError::Cancelled));
            }
            return self.send_close(id);
        }

        tracing::info!("{} confirmed as peer channel {}", id, sender_channel);
        let handle = ChannelHandle::new(
            id,
            Arc::clone(&entry.window),
            max_packet,
            commands,
        );
        entry.handler.opened(handle.clone(), data);
        if let Some(reply) = entry.open_reply.take() {
            let _ = reply.send(Ok(handle));
        }
        Ok(())
    }

    fn on_open_failure(
        &mut self,
        recipient: u32,
        reason_code: u32,
        description: String,
    ) -> Result<(), MuxError> {
        let id = self.opening_entry(MessageType::ChannelOpenFailure, recipient)?;
        let Some(mut entry) = self.channels.remove(&id) else {
            return Err(MuxError::NoSuchChannel(id));
        };

        tracing::info!(
            "{} refused by peer (reason {}): {}",
            id,
            reason_code,
            description
        );
        entry.window.close();
        entry.handler.open_failed(reason_code, &description);
        if let Some(reply) = entry.open_reply.take() {
            let _ = reply.send(Err(OpenError::Rejected {
                reason_code,
                description,
            }));
        }
        Ok(())
    }

    fn on_data(
        &mut self,
        message_type: MessageType,
        recipient: u32,
        data_type: Option<u32>,
        data: Bytes,
    ) -> Result<(), MuxError> {
        let id = self.inbound_channel(message_type, recipient)?;
        let entry = self.entry_mut(id)?;

        let Some(remote) = entry.remote_id() else {
            tracing::trace!("Ignoring {} bytes for closing {}", data.len(), id);
            return Ok(());
        };

        if data.len() > entry.local_window_left as usize {
            return Err(MuxError::WindowExceeded {
                channel: id,
                len: data.len(),
                available: entry.local_window_left,
            });
        }
        // Checked above, so the length fits in u32
        entry.local_window_left -= data.len() as u32;

        match data_type {
            Some(data_type) => entry.handler.extended_data_received(data_type, data),
            None => entry.handler.data_received(data),
        }

        // Replenish once less than half of the advertised window remains
        if entry.handler.replenishes_window()
            && entry.local_window_left < entry.local_window_size / 2
        {
            let bytes_to_add = entry.local_window_size - entry.local_window_left;
            entry.local_window_left = entry.local_window_size;
            self.send(Message::ChannelWindowAdjust {
                recipient_channel: remote,
                bytes_to_add,
            })?;
        }
        Ok(())
    }

    fn on_close(&mut self, recipient: u32) -> Result<(), MuxError> {
        let id = self.inbound_channel(MessageType::ChannelClose, recipient)?;
        let Some(mut entry) = self.channels.remove(&id) else {
            return Err(MuxError::NoSuchChannel(id));
        };

        entry.window.close();
        self.requests.cancel(PendingKey::Channel(id));

        // Answer the peer's CLOSE unless ours is already on the wire
        let echo = entry.remote_id().map(|remote_id| Message::ChannelClose {
            recipient_channel: remote_id,
        });

        tracing::debug!("{} closed by peer", id);
        entry.handler.closed();

        if let Some(message) = echo {
            self.send(message)?;
        }
        Ok(())
    }

    fn on_channel_request(
        &mut self,
        recipient: u32,
        request_type: &str,
        want_reply: bool,
        data: Bytes,
    ) -> Result<(), MuxError> {
        let id = self.inbound_channel(MessageType::ChannelRequest, recipient)?;
        let entry = self.entry_mut(id)?;

        let Some(remote) = entry.remote_id() else {
            tracing::debug!("Ignoring request {} for closing {}", request_type, id);
            return Ok(());
        };

        let accepted = entry
            .handler
            .request_received(&canonical_name(request_type), data);
        tracing::debug!(
            "Request {} on {} {}",
            request_type,
            id,
            if accepted { "accepted" } else { "rejected" }
        );

        if !want_reply {
            return Ok(());
        }

        if accepted {
            self.send(Message::ChannelSuccess {
                recipient_channel: remote,
            })
        } else {
            self.send(Message::ChannelFailure {
                recipient_channel: remote,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelEvent, ForwardingChannel};
    use futures::FutureExt;
    use sshmux_core::traits::OpenRejection;
    use sshmux_core::RequestError;

    type TestConnection = Connection<mpsc::UnboundedSender<Packet>>;

    /// Accepts `session` channels as forwarding channels with a 1000 byte window
    struct TestFactory {
        events: mpsc::UnboundedSender<ChannelEvent>,
    }

    impl ChannelFactory for TestFactory {
        fn create(
            &mut self,
            channel_type: &str,
            _window_size: u32,
            _max_packet: u32,
            _data: Bytes,
        ) -> Result<Box<dyn Channel>, OpenRejection> {
            if channel_type != "session" {
                return Err(OpenRejection::unknown_type(channel_type));
            }
            Ok(Box::new(
                ForwardingChannel::new("session", self.events.clone())
                    .with_window(1000, 100)
                    .accept_request("shell"),
            ))
        }
    }

    struct Fixture {
        conn: TestConnection,
        wire: mpsc::UnboundedReceiver<Packet>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        commands: mpsc::UnboundedReceiver<Command>,
    }

    impl Fixture {
        fn new() -> Self {
            let (tx, wire) = mpsc::unbounded_channel();
            let (events_tx, events) = mpsc::unbounded_channel();
            let (conn, commands) = Connection::new(tx, TestFactory { events: events_tx });
            Self {
                conn,
                wire,
                events,
                commands,
            }
        }

        fn deliver(&mut self, message: Message) -> Result<(), MuxError> {
            self.conn.dispatch(message.encode().unwrap())
        }

        fn sent(&mut self) -> Vec<Message> {
            let mut messages = Vec::new();
            while let Ok(packet) = self.wire.try_recv() {
                messages.push(Message::decode(packet).unwrap());
            }
            messages
        }

        /// Accept an inbound session from peer channel `remote`
        fn accept_session(&mut self, remote: u32, window: u32) -> ChannelId {
            self.deliver(Message::ChannelOpen {
                channel_type: "session".to_string(),
                sender_channel: remote,
                window_size: window,
                max_packet: 64,
                data: Bytes::new(),
            })
            .unwrap();

            let confirmation = self.sent().pop().unwrap();
            match confirmation {
                Message::ChannelOpenConfirmation { sender_channel, .. } => {
                    assert!(matches!(self.events.try_recv(), Ok(ChannelEvent::Opened { .. })));
                    ChannelId::new(sender_channel)
                }
                other => panic!("Expected confirmation, got {:?}", other),
            }
        }
    }

    fn local_session(fixture: &mut Fixture) -> (ChannelId, PendingOpen) {
        let channel = ForwardingChannel::new("session", {
            let (tx, _rx) = mpsc::unbounded_channel();
            tx
        })
        .with_window(4096, 512);
        fixture
            .conn
            .open_channel(Box::new(channel), Bytes::new())
            .unwrap()
    }

    #[test]
    fn test_local_open_confirmed() {
        let mut fx = Fixture::new();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let channel = ForwardingChannel::new("session", events_tx).with_window(4096, 512);

        let (id, pending) = fx.conn.open_channel(Box::new(channel), Bytes::new()).unwrap();

        assert_eq!(id, ChannelId::new(0));
        assert_eq!(fx.conn.channel_state(id), Some(ChannelState::Opening));
        assert_eq!(
            fx.sent(),
            vec![Message::ChannelOpen {
                channel_type: "session".to_string(),
                sender_channel: 0,
                window_size: 4096,
                max_packet: 512,
                data: Bytes::new(),
            }]
        );

        fx.deliver(Message::ChannelOpenConfirmation {
            recipient_channel: 0,
            sender_channel: 7,
            window_size: 2000,
            max_packet: 300,
            data: Bytes::new(),
        })
        .unwrap();

        assert_eq!(fx.conn.channel_state(id), Some(ChannelState::Open { remote_id: 7 }));
        let handle = pending.now_or_never().unwrap().unwrap();
        assert_eq!(handle.window_left(), 2000);
        assert_eq!(handle.max_packet(), 300);
        assert!(matches!(events.try_recv(), Ok(ChannelEvent::Opened { .. })));
    }

    #[test]
    fn test_exit_status_reaches_forwarding_channel() {
        let mut fx = Fixture::new();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let channel = ForwardingChannel::new("session", events_tx)
            .with_window(1000, 32000)
            .accept_request("exit-status");
        let (id, _pending) = fx.conn.open_channel(Box::new(channel), Bytes::new()).unwrap();
        fx.deliver(Message::ChannelOpenConfirmation {
            recipient_channel: id.as_u32(),
            sender_channel: 42,
            window_size: 1000,
            max_packet: 32000,
            data: Bytes::new(),
        })
        .unwrap();
        fx.sent();

        assert_eq!(fx.conn.remote_id(id), Some(42));
        assert_eq!(fx.conn.window_left(id), Some(1000));
        assert!(matches!(events.try_recv(), Ok(ChannelEvent::Opened { .. })));

        fx.deliver(Message::ChannelRequest {
            recipient_channel: id.as_u32(),
            request_type: "exit-status".to_string(),
            want_reply: true,
            data: Bytes::from_static(&[0, 0, 0, 7]),
        })
        .unwrap();

        assert_eq!(
            fx.sent(),
            vec![Message::ChannelSuccess {
                recipient_channel: 42
            }]
        );
        match events.try_recv() {
            Ok(event) => assert!(event.is_request("exit-status")),
            other => panic!("Expected exit-status request, got {:?}", other),
        }
    }

    #[test]
    fn test_self_managed_window_is_not_refilled() {
        struct Manual;

        impl Channel for Manual {
            fn channel_type(&self) -> &str {
                "manual"
            }

            fn window_size(&self) -> u32 {
                100
            }

            fn replenishes_window(&self) -> bool {
                false
            }
        }

        let mut fx = Fixture::new();
        let (id, _pending) = fx.conn.open_channel(Box::new(Manual), Bytes::new()).unwrap();
        fx.deliver(Message::ChannelOpenConfirmation {
            recipient_channel: id.as_u32(),
            sender_channel: 5,
            window_size: 0,
            max_packet: 100,
            data: Bytes::new(),
        })
        .unwrap();
        fx.sent();

        fx.deliver(Message::ChannelData {
            recipient_channel: id.as_u32(),
            data: Bytes::from(vec![0u8; 80]),
        })
        .unwrap();
        assert!(fx.sent().is_empty());
        assert!(matches!(
            fx.deliver(Message::ChannelData {
                recipient_channel: id.as_u32(),
                data: Bytes::from(vec![0u8; 30]),
            }),
            Err(MuxError::WindowExceeded { available: 20, .. })
        ));

        fx.conn.adjust_window(id, 80).unwrap();
        assert_eq!(
            fx.sent(),
            vec![Message::ChannelWindowAdjust {
                recipient_channel: 5,
                bytes_to_add: 80,
            }]
        );
    }

    #[test]
    fn test_local_ids_strictly_increase() {
        let mut fx = Fixture::new();
        let ids: Vec<_> = (0..5).map(|_| local_session(&mut fx).0).collect();

        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(fx.conn.channel_count(), 5);
    }

    #[test]
    fn test_local_open_refused() {
        let mut fx = Fixture::new();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let channel = ForwardingChannel::new("direct-tcpip", events_tx);
        let (id, pending) = fx.conn.open_channel(Box::new(channel), Bytes::new()).unwrap();

        fx.deliver(Message::ChannelOpenFailure {
            recipient_channel: id.as_u32(),
            reason_code: 2,
            description: "connect failed".to_string(),
            language: String::new(),
        })
        .unwrap();

        assert_eq!(fx.conn.channel_count(), 0);
        match pending.now_or_never().unwrap() {
            Err(OpenError::Rejected {
                reason_code,
                description,
            }) => {
                assert_eq!(reason_code, 2);
                assert_eq!(description, "connect failed");
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
        assert!(matches!(
            events.try_recv(),
            Ok(ChannelEvent::OpenFailed { reason_code: 2, .. })
        ));
    }

    #[test]
    fn test_inbound_open_accepted() {
        let mut fx = Fixture::new();

        fx.deliver(Message::ChannelOpen {
            channel_type: "session".to_string(),
            sender_channel: 9,
            window_size: 300,
            max_packet: 50,
            data: Bytes::new(),
        })
        .unwrap();

        assert_eq!(
            fx.sent(),
            vec![Message::ChannelOpenConfirmation {
                recipient_channel: 9,
                sender_channel: 0,
                window_size: 1000,
                max_packet: 100,
                data: Bytes::new(),
            }]
        );
        let id = ChannelId::new(0);
        assert_eq!(fx.conn.window_left(id), Some(300));
        assert_eq!(fx.conn.remote_id(id), Some(9));
        match fx.events.try_recv() {
            Ok(ChannelEvent::Opened { handle, .. }) => assert_eq!(handle.max_packet(), 50),
            other => panic!("Expected Opened, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_open_unknown_type_allocates_no_id() {
        let mut fx = Fixture::new();

        fx.deliver(Message::ChannelOpen {
            channel_type: "x11".to_string(),
            sender_channel: 5,
            window_size: 100,
            max_packet: 10,
            data: Bytes::new(),
        })
        .unwrap();

        match fx.sent().as_slice() {
            [Message::ChannelOpenFailure {
                recipient_channel: 5,
                reason_code,
                ..
            }] => assert_eq!(*reason_code, OpenFailureReason::UnknownChannelType.as_u32()),
            other => panic!("Expected open failure, got {:?}", other),
        }
        assert_eq!(fx.conn.channel_count(), 0);

        let (id, _pending) = local_session(&mut fx);
        assert_eq!(id, ChannelId::new(0));
    }

    #[test]
    fn test_ids_exhausted() {
        let mut fx = Fixture::new();
        fx.conn.next_local_id = None;

        let channel = ForwardingChannel::pair("session").0;
        let result = fx.conn.open_channel(Box::new(channel), Bytes::new());
        assert!(matches!(result, Err(MuxError::ChannelIdsExhausted)));

        fx.deliver(Message::ChannelOpen {
            channel_type: "session".to_string(),
            sender_channel: 1,
            window_size: 100,
            max_packet: 10,
            data: Bytes::new(),
        })
        .unwrap();
        assert!(matches!(
            fx.sent().as_slice(),
            [Message::ChannelOpenFailure { reason_code: 4, .. }]
        ));
    }

    #[test]
    fn test_data_consumes_window_and_replenishes() {
        let mut fx = Fixture::new();
        let id = fx.accept_session(3, 100);

        fx.deliver(Message::ChannelData {
            recipient_channel: id.as_u32(),
            data: Bytes::from(vec![1u8; 400]),
        })
        .unwrap();
        assert!(fx.sent().is_empty());

        fx.deliver(Message::ChannelData {
            recipient_channel: id.as_u32(),
            data: Bytes::from(vec![2u8; 200]),
        })
        .unwrap();
        assert_eq!(
            fx.sent(),
            vec![Message::ChannelWindowAdjust {
                recipient_channel: 3,
                bytes_to_add: 600,
            }]
        );

        assert!(matches!(fx.events.try_recv(), Ok(ChannelEvent::Data(d)) if d.len() == 400));
        assert!(matches!(fx.events.try_recv(), Ok(ChannelEvent::Data(d)) if d.len() == 200));
    }

    #[test]
    fn test_data_beyond_window_is_fatal() {
        let mut fx = Fixture::new();
        let id = fx.accept_session(3, 100);

        let result = fx.deliver(Message::ChannelData {
            recipient_channel: id.as_u32(),
            data: Bytes::from(vec![0u8; 1001]),
        });

        match result {
            Err(e @ MuxError::WindowExceeded { .. }) => assert!(e.is_fatal()),
            other => panic!("Expected WindowExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_window_adjust_overflow_is_fatal() {
        let mut fx = Fixture::new();
        let id = fx.accept_session(3, u32::MAX - 10);

        let result = fx.deliver(Message::ChannelWindowAdjust {
            recipient_channel: id.as_u32(),
            bytes_to_add: 100,
        });
        assert!(matches!(result, Err(MuxError::WindowOverflow { .. })));
        assert_eq!(fx.conn.window_left(id), Some(u32::MAX - 10));
    }

    #[test]
    fn test_request_replies_resolve_in_order() {
        let mut fx = Fixture::new();
        let id = fx.accept_session(8, 100);

        let first = fx
            .conn
            .send_request(id, "pty-req", Bytes::new(), true)
            .unwrap()
            .unwrap();
        let second = fx
            .conn
            .send_request(id, "shell", Bytes::new(), true)
            .unwrap()
            .unwrap();
        assert_eq!(fx.conn.pending_requests(id), 2);
        assert_eq!(fx.sent().len(), 2);

        fx.deliver(Message::ChannelFailure { recipient_channel: 0 })
            .unwrap();
        fx.deliver(Message::ChannelSuccess { recipient_channel: 0 })
            .unwrap();

        assert_eq!(first.now_or_never(), Some(Err(RequestError::Rejected)));
        assert_eq!(second.now_or_never(), Some(Ok(Bytes::new())));
        assert_eq!(fx.conn.pending_requests(id), 0);
    }

    #[test]
    fn test_late_reply_is_dropped() {
        let mut fx = Fixture::new();
        assert!(fx
            .deliver(Message::ChannelSuccess { recipient_channel: 3 })
            .is_ok());
        assert!(fx.deliver(Message::RequestFailure).is_ok());
    }

    #[test]
    fn test_inbound_request_is_answered() {
        let mut fx = Fixture::new();
        let id = fx.accept_session(4, 100);

        fx.deliver(Message::ChannelRequest {
            recipient_channel: id.as_u32(),
            request_type: "shell".to_string(),
            want_reply: true,
            data: Bytes::new(),
        })
        .unwrap();
        fx.deliver(Message::ChannelRequest {
            recipient_channel: id.as_u32(),
            request_type: "x11-req".to_string(),
            want_reply: true,
            data: Bytes::new(),
        })
        .unwrap();
        fx.deliver(Message::ChannelRequest {
            recipient_channel: id.as_u32(),
            request_type: "signal".to_string(),
            want_reply: false,
            data: Bytes::new(),
        })
        .unwrap();

        assert_eq!(
            fx.sent(),
            vec![
                Message::ChannelSuccess { recipient_channel: 4 },
                Message::ChannelFailure { recipient_channel: 4 },
            ]
        );
        match fx.events.try_recv() {
            Ok(ChannelEvent::Request { request_type, .. }) => assert_eq!(request_type, "shell"),
            other => panic!("Expected Request, got {:?}", other),
        }
        match fx.events.try_recv() {
            Ok(ChannelEvent::Request { request_type, .. }) => assert_eq!(request_type, "x11_req"),
            other => panic!("Expected Request, got {:?}", other),
        }
    }

    #[test]
    fn test_local_close_handshake() {
        let mut fx = Fixture::new();
        let id = fx.accept_session(6, 100);
        let pending = fx
            .conn
            .send_request(id, "exec", Bytes::new(), true)
            .unwrap()
            .unwrap();
        fx.sent();

        fx.conn.send_close(id).unwrap();
        assert_eq!(fx.sent(), vec![Message::ChannelClose { recipient_channel: 6 }]);
        assert_eq!(fx.conn.channel_state(id), Some(ChannelState::Closing));
        assert_eq!(pending.now_or_never(), Some(Err(RequestError::Cancelled)));

        // A second close is a no-op
        fx.conn.send_close(id).unwrap();
        assert!(fx.sent().is_empty());

        // Sending on a closing channel is refused
        assert!(matches!(
            fx.conn.send_data(id, Bytes::from_static(b"late")),
            Err(MuxError::NoSuchChannel(_))
        ));

        fx.deliver(Message::ChannelClose {
            recipient_channel: id.as_u32(),
        })
        .unwrap();
        assert!(fx.sent().is_empty());
        assert_eq!(fx.conn.channel_count(), 0);
        assert!(matches!(fx.events.try_recv(), Ok(ChannelEvent::Closed)));

        assert!(matches!(
            fx.conn.send_close(id),
            Err(MuxError::NoSuchChannel(_))
        ));
    }

    #[test]
    fn test_peer_close_is_answered() {
        let mut fx = Fixture::new();
        let id = fx.accept_session(2, 100);
        let handle = fx.conn.channel_handle(id).unwrap();

        fx.deliver(Message::ChannelClose {
            recipient_channel: id.as_u32(),
        })
        .unwrap();

        assert_eq!(fx.sent(), vec![Message::ChannelClose { recipient_channel: 2 }]);
        assert!(handle.is_closed());
        assert!(matches!(fx.events.try_recv(), Ok(ChannelEvent::Closed)));
    }

    #[test]
    fn test_close_while_opening() {
        let mut fx = Fixture::new();
        let (id, pending) = local_session(&mut fx);
        fx.sent();

        fx.conn.send_close(id).unwrap();
        assert!(fx.sent().is_empty());

        fx.deliver(Message::ChannelOpenConfirmation {
            recipient_channel: id.as_u32(),
            sender_channel: 11,
            window_size: 100,
            max_packet: 10,
            data: Bytes::new(),
        })
        .unwrap();

        assert_eq!(fx.sent(), vec![Message::ChannelClose { recipient_channel: 11 }]);
        assert!(matches!(pending.now_or_never(), Some(Err(OpenError::Cancelled))));
    }

    #[test]
    fn test_unknown_channel_is_fatal() {
        let mut fx = Fixture::new();

        let result = fx.deliver(Message::ChannelData {
            recipient_channel: 42,
            data: Bytes::from_static(b"x"),
        });

        match result {
            Err(e @ MuxError::UnknownChannel { channel: 42, .. }) => assert!(e.is_fatal()),
            other => panic!("Expected UnknownChannel, got {:?}", other),
        }
    }

    #[test]
    fn test_message_for_opening_channel_is_violation() {
        let mut fx = Fixture::new();
        let (id, _pending) = local_session(&mut fx);

        let result = fx.deliver(Message::ChannelEof {
            recipient_channel: id.as_u32(),
        });
        assert!(matches!(result, Err(MuxError::ChannelNotOpen { .. })));

        // Confirming an already open channel is equally invalid
        let id = fx.accept_session(1, 100);
        let result = fx.deliver(Message::ChannelOpenConfirmation {
            recipient_channel: id.as_u32(),
            sender_channel: 1,
            window_size: 10,
            max_packet: 10,
            data: Bytes::new(),
        });
        assert!(matches!(result, Err(MuxError::ChannelNotOpen { .. })));
    }

    #[test]
    fn test_malformed_packet_is_fatal() {
        let mut fx = Fixture::new();
        let result = fx.conn.dispatch(Packet::new(94, vec![0u8, 0]));
        assert!(matches!(result, Err(MuxError::Protocol(_))));
    }

    #[test]
    fn test_global_requests() {
        let mut fx = Fixture::new();
        fx.conn.register_global_handler("tcpip-forward", |data: Bytes| {
            GlobalReply::Accepted(data)
        });

        fx.deliver(Message::GlobalRequest {
            request_type: "tcpip-forward".to_string(),
            want_reply: true,
            data: Bytes::from_static(b"\x00\x00\x00\x16"),
        })
        .unwrap();
        fx.deliver(Message::GlobalRequest {
            request_type: "keepalive@openssh.com".to_string(),
            want_reply: true,
            data: Bytes::new(),
        })
        .unwrap();
        fx.deliver(Message::GlobalRequest {
            request_type: "no-more-sessions@openssh.com".to_string(),
            want_reply: false,
            data: Bytes::new(),
        })
        .unwrap();

        assert_eq!(
            fx.sent(),
            vec![
                Message::RequestSuccess {
                    data: Bytes::from_static(b"\x00\x00\x00\x16")
                },
                Message::RequestFailure,
            ]
        );
    }

    #[test]
    fn test_global_reply_resolves_pending() {
        let mut fx = Fixture::new();
        let pending = fx
            .conn
            .send_global_request("tcpip-forward", Bytes::new(), true)
            .unwrap()
            .unwrap();
        assert!(matches!(
            fx.sent().as_slice(),
            [Message::GlobalRequest { want_reply: true, .. }]
        ));

        fx.deliver(Message::RequestSuccess {
            data: Bytes::from_static(b"port"),
        })
        .unwrap();
        assert_eq!(pending.now_or_never(), Some(Ok(Bytes::from_static(b"port"))));
    }

    #[test]
    fn test_apply_handle_commands() {
        let mut fx = Fixture::new();
        let id = fx.accept_session(5, 100);
        let handle = fx.conn.channel_handle(id).unwrap();

        assert_eq!(handle.try_write(Bytes::from_static(b"hello")).unwrap(), 5);
        handle.send_eof().unwrap();
        handle.close().unwrap();
        handle.close().unwrap();

        while let Ok(command) = fx.commands.try_recv() {
            fx.conn.apply(command).unwrap();
        }

        assert_eq!(
            fx.sent(),
            vec![
                Message::ChannelData {
                    recipient_channel: 5,
                    data: Bytes::from_static(b"hello"),
                },
                Message::ChannelEof { recipient_channel: 5 },
                Message::ChannelClose { recipient_channel: 5 },
            ]
        );
        assert_eq!(handle.window_left(), 95);
    }

    #[test]
    fn test_local_adjust_window() {
        let mut fx = Fixture::new();
        let id = fx.accept_session(5, 100);

        fx.conn.adjust_window(id, 250).unwrap();
        assert_eq!(
            fx.sent(),
            vec![Message::ChannelWindowAdjust {
                recipient_channel: 5,
                bytes_to_add: 250,
            }]
        );

        // The extra credit is honored
        fx.deliver(Message::ChannelData {
            recipient_channel: id.as_u32(),
            data: Bytes::from(vec![0u8; 1200]),
        })
        .unwrap();
    }

    #[test]
    fn test_shutdown_cancels_everything() {
        let mut fx = Fixture::new();
        let (_, opening) = local_session(&mut fx);
        let id = fx.accept_session(1, 100);
        let reply = fx
            .conn
            .send_request(id, "exec", Bytes::new(), true)
            .unwrap()
            .unwrap();
        let global = fx
            .conn
            .send_global_request("tcpip-forward", Bytes::new(), true)
            .unwrap()
            .unwrap();

        fx.conn.shutdown();

        assert_eq!(fx.conn.channel_count(), 0);
        assert!(matches!(opening.now_or_never(), Some(Err(OpenError::Cancelled))));
        assert_eq!(reply.now_or_never(), Some(Err(RequestError::Cancelled)));
        assert_eq!(global.now_or_never(), Some(Err(RequestError::Cancelled)));
        assert!(matches!(fx.events.try_recv(), Ok(ChannelEvent::Closed)));
    }
}

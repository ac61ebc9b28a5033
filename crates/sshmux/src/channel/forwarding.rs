//! Channel that forwards every hook to an async event stream

use std::collections::HashSet;

use bytes::Bytes;
use tokio::sync::mpsc;

use sshmux_core::config::{DEFAULT_MAX_PACKET, DEFAULT_WINDOW_SIZE};
use sshmux_core::traits::{canonical_name, Channel};
use sshmux_core::ChannelHandle;

/// Something that happened on a [`ForwardingChannel`]
#[derive(Debug)]
pub enum ChannelEvent {
    /// The channel is open
    Opened { handle: ChannelHandle, data: Bytes },
    /// The peer refused the open
    OpenFailed { reason_code: u32, description: String },
    /// Channel data
    Data(Bytes),
    /// Typed channel data
    ExtendedData { data_type: u32, data: Bytes },
    /// The peer sent EOF
    Eof,
    /// A channel request (name is canonical)
    Request { request_type: String, data: Bytes },
    /// The channel is gone
    Closed,
}

impl ChannelEvent {
    /// Whether this is a request named `request_type`, in any spelling
    pub fn is_request(&self, request_type: &str) -> bool {
        match self {
            ChannelEvent::Request {
                request_type: name, ..
            } => canonical_name(name) == canonical_name(request_type),
            _ => false,
        }
    }
}

/// Channel whose hooks become [`ChannelEvent`]s
///
/// Lets async code consume a channel without implementing [`Channel`].
/// Requests are rejected unless their name was registered with
/// [`accept_request`](Self::accept_request); they are forwarded either way.
#[derive(Debug)]
pub struct ForwardingChannel {
    channel_type: String,
    window_size: u32,
    max_packet: u32,
    accepted: HashSet<String>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl ForwardingChannel {
    /// Create a channel that sends its events to `events`
    pub fn new(channel_type: impl Into<String>, events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            channel_type: channel_type.into(),
            window_size: DEFAULT_WINDOW_SIZE,
            max_packet: DEFAULT_MAX_PACKET,
            accepted: HashSet::new(),
            events,
        }
    }

    /// Create a channel together with its event receiver
    pub fn pair(channel_type: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(channel_type, tx), rx)
    }

    /// Advertise a different receive window and packet limit
    pub fn with_window(mut self, window_size: u32, max_packet: u32) -> Self {
        self.window_size = window_size;
        self.max_packet = max_packet;
        self
    }

    /// Accept requests named `request_type`
    pub fn accept_request(mut self, request_type: &str) -> Self {
        self.accepted.insert(canonical_name(request_type));
        self
    }

    fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("{} channel event dropped, receiver gone", self.channel_type);
        }
    }
}

impl Channel for ForwardingChannel {
    fn channel_type(&self) -> &str {
        &self.channel_type
    }

    fn window_size(&self) -> u32 {
        self.window_size
    }

    fn max_packet(&self) -> u32 {
        self.max_packet
    }

    fn opened(&mut self, handle: ChannelHandle, data: Bytes) {
        self.emit(ChannelEvent::Opened { handle, data });
    }

    fn open_failed(&mut self, reason_code: u32, description: &str) {
        self.emit(ChannelEvent::OpenFailed {
            reason_code,
            description: description.to_string(),
        });
    }

    fn data_received(&mut self, data: Bytes) {
        self.emit(ChannelEvent::Data(data));
    }

    fn extended_data_received(&mut self, data_type: u32, data: Bytes) {
        self.emit(ChannelEvent::ExtendedData { data_type, data });
    }

    fn eof_received(&mut self) {
        self.emit(ChannelEvent::Eof);
    }

    fn closed(&mut self) {
        self.emit(ChannelEvent::Closed);
    }

    fn request_received(&mut self, request_type: &str, data: Bytes) -> bool {
        let request_type = canonical_name(request_type);
        let accepted = self.accepted.contains(&request_type);
        self.emit(ChannelEvent::Request {
            request_type,
            data,
        });
        accepted
    }
}

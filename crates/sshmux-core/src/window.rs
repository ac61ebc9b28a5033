//! Send-side flow-control window
//!
//! A [`Window`] holds the credit the peer has granted for one channel. The
//! multiplexer adds credit when a `CHANNEL_WINDOW_ADJUST` arrives; writers
//! reserve credit before handing bytes to the multiplexer, so the total sent
//! never exceeds the total granted.

use std::sync::{Mutex, MutexGuard};

use sshmux_protocol::ChannelId;
use tokio::sync::Notify;

use crate::error::{ChannelError, MuxError};

#[derive(Debug)]
struct WindowState {
    left: u32,
    closed: bool,
}

/// Remaining send credit for one channel, shared between the multiplexer and
/// the channel's writers
#[derive(Debug)]
pub struct Window {
    channel: ChannelId,
    state: Mutex<WindowState>,
    notify: Notify,
}

impl Window {
    /// Create a window with the initial credit from the open handshake
    pub fn new(channel: ChannelId, initial: u32) -> Self {
        Self {
            channel,
            state: Mutex::new(WindowState {
                left: initial,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, WindowState> {
        // The state is two plain fields, so a poisoned lock is still consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Channel this window belongs to
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Credit currently available
    pub fn available(&self) -> u32 {
        self.state().left
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Add credit granted by the peer, returning the new total
    ///
    /// An adjustment that would overflow the 32-bit counter is a protocol
    /// violation and leaves the window unchanged.
    pub fn add_window_bytes(&self, bytes: u32) -> Result<u32, MuxError> {
        let left = {
            let mut state = self.state();
            state.left = state
                .left
                .checked_add(bytes)
                .ok_or(MuxError::WindowOverflow {
                    channel: self.channel,
                })?;
            state.left
        };

        self.notify.notify_waiters();
        Ok(left)
    }

    /// Take up to `max` bytes of credit without waiting
    ///
    /// Returns `Ok(0)` when no credit is available.
    pub fn try_reserve(&self, max: usize) -> Result<usize, ChannelError> {
        let mut state = self.state();
        if state.closed {
            return Err(ChannelError::Closed(self.channel));
        }

        let granted = (state.left as usize).min(max);
        // `granted <= state.left`, so this fits in u32
        state.left -= granted as u32;
        Ok(granted)
    }

    /// Take between 1 and `max` bytes of credit, waiting for an adjustment
    /// when none is available
    pub async fn reserve(&self, max: usize) -> Result<usize, ChannelError> {
        if max == 0 {
            return Ok(0);
        }

        loop {
            // Registered before checking so an adjustment in between is not missed
            let notified = self.notify.notified();

            let granted = self.try_reserve(max)?;
            if granted > 0 {
                return Ok(granted);
            }

            tracing::trace!("{} waiting for window credit", self.channel);
            notified.await;
        }
    }

    /// Mark the channel closed and wake every waiting writer
    pub fn close(&self) {
        self.state().closed = true;
        self.notify.notify_waiters();
    }
}

//! Channel flow-control configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default receive window advertised for new channels (2 MiB)
pub const DEFAULT_WINDOW_SIZE: u32 = 2 * 1024 * 1024;

/// Default maximum data payload accepted per packet (32 KiB)
pub const DEFAULT_MAX_PACKET: u32 = 32 * 1024;

/// Window and packet limits this side advertises for its channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Initial credit granted to the peer
    pub window_size: u32,

    /// Largest data payload the peer may send in one message
    pub max_packet: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_packet: DEFAULT_MAX_PACKET,
        }
    }
}

impl ChannelConfig {
    /// Reject limits that would stall every channel
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_packet == 0 {
            return Err(ConfigError::Invalid("max_packet must be non-zero".to_string()));
        }
        if self.window_size == 0 {
            return Err(ConfigError::Invalid("window_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

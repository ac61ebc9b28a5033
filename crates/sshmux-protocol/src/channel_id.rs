//! Channel identifier type

use std::fmt;

/// Locally allocated identifier for a logical channel
///
/// Remote identifiers are opaque to this side and travel as plain `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Create a new channel ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// The ID that follows this one, if the 32-bit space is not exhausted
    pub fn next(&self) -> Option<ChannelId> {
        self.0.checked_add(1).map(ChannelId)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

impl From<u32> for ChannelId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_display() {
        let id = ChannelId::new(42);
        assert_eq!(format!("{}", id), "channel-42");
    }

    #[test]
    fn test_channel_id_next() {
        assert_eq!(ChannelId::new(0).next(), Some(ChannelId::new(1)));
        assert_eq!(ChannelId::new(u32::MAX).next(), None);
    }

    #[test]
    fn test_channel_id_ordering() {
        assert!(ChannelId::new(1) < ChannelId::new(2));
        assert_eq!(ChannelId::from(7), ChannelId::new(7));
    }
}

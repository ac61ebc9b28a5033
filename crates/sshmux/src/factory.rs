//! Channel factories for inbound open requests

use std::sync::Arc;

use bytes::Bytes;

use sshmux_core::config::MuxConfig;
use sshmux_core::traits::{Channel, ChannelFactory, OpenRejection};
use sshmux_protocol::OpenFailureReason;

use crate::session::{ProcessSpawner, Session, SubsystemRegistry};

/// Refuses every inbound open (the usual client side)
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAllFactory;

impl ChannelFactory for RejectAllFactory {
    fn create(
        &mut self,
        channel_type: &str,
        _window_size: u32,
        _max_packet: u32,
        _data: Bytes,
    ) -> Result<Box<dyn Channel>, OpenRejection> {
        tracing::debug!("Refusing inbound {} channel", channel_type);
        Err(OpenRejection::new(
            OpenFailureReason::AdministrativelyProhibited,
            "channel opens are not accepted",
        ))
    }
}

/// Accepts `session` channels and refuses every other type
pub struct SessionFactory {
    config: MuxConfig,
    spawner: Arc<dyn ProcessSpawner>,
    subsystems: Arc<SubsystemRegistry>,
}

impl SessionFactory {
    /// Create a factory starting processes with `spawner`
    pub fn new(config: MuxConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            config,
            spawner,
            subsystems: Arc::new(SubsystemRegistry::new()),
        }
    }

    /// Subsystems sessions may start
    pub fn with_subsystems(mut self, subsystems: SubsystemRegistry) -> Self {
        self.subsystems = Arc::new(subsystems);
        self
    }
}

impl ChannelFactory for SessionFactory {
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

        Ok(Box::new(Session::new(
            self.config.channel,
            self.config.session.clone(),
            Arc::clone(&self.spawner),
            Arc::clone(&self.subsystems),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PtySpawner;

    #[test]
    fn test_reject_all() {
        let result = RejectAllFactory.create("session", 100, 100, Bytes::new());
        match result {
            Err(rejection) => assert_eq!(
                rejection.reason_code,
                OpenFailureReason::AdministrativelyProhibited.as_u32()
            ),
            Ok(_) => panic!("Expected rejection"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_session_factory_types() {
        let spawner = Arc::new(PtySpawner::new("/bin/sh").unwrap());
        let mut config = MuxConfig::default();
        config.channel.window_size = 4096;
        let mut factory = SessionFactory::new(config, spawner);

        let channel = factory
            .create("session", 100, 100, Bytes::new())
            .ok()
            .unwrap();
        assert_eq!(channel.channel_type(), "session");
        assert_eq!(channel.window_size(), 4096);

        let rejection = factory
            .create("direct-tcpip", 100, 100, Bytes::new())
            .err()
            .unwrap();
        assert_eq!(
            rejection.reason_code,
            OpenFailureReason::UnknownChannelType.as_u32()
        );
    }
}

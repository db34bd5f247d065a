use crate::domain::PeerName;
use std::time::Duration;

/// Configuration for a peer connector
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed local peer name. A name is generated on first connect when
    /// this is `None`.
    pub name: Option<PeerName>,

    /// How long to wait for the rendezvous session to become ready
    pub open_timeout: Duration,

    /// How long to wait for a data channel to open
    pub channel_timeout: Duration,

    /// How long to wait for an outbound call to be answered and its
    /// remote stream to arrive
    pub call_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: None,
            open_timeout: Duration::from_secs(30),
            channel_timeout: Duration::from_secs(20),
            call_timeout: Duration::from_secs(45),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: PeerName) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

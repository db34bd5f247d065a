use crate::domain::PeerName;
use crate::infrastructure::transport::TransportError;

/// Session-level failures: rendezvous open, readiness, teardown races
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("rendezvous session failed: {0}")]
    Transport(#[from] TransportError),

    #[error("session open timed out")]
    Timeout,

    #[error("session was torn down before it became ready")]
    Aborted,
}

/// Failures while opening or using a reliable channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataChannelError {
    #[error("data channel to {peer} failed: {source}")]
    Transport {
        peer: PeerName,
        source: TransportError,
    },

    #[error("data channel open to {0} timed out")]
    Timeout(PeerName),

    #[error("data channel open to {0} abandoned")]
    Aborted(PeerName),
}

/// Failures while negotiating or answering a media call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaCallError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Channel(#[from] DataChannelError),

    #[error("media call with {peer} failed: {source}")]
    Transport {
        peer: PeerName,
        source: TransportError,
    },

    #[error("call rejected by {0}")]
    Rejected(PeerName),

    #[error("call with {0} timed out")]
    Timeout(PeerName),

    #[error("inbound call from {0} already answered")]
    AlreadyAnswered(PeerName),
}

/// What `connect` can fail with: the session itself, or the channel
/// establishment it chains into
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Data(#[from] DataChannelError),
}

/// A send was attempted and no open channel could be had
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no open data channel to {peer}")]
pub struct NotConnectedError {
    pub peer: PeerName,
    #[source]
    pub source: ConnectorError,
}

pub type Result<T, E = ConnectorError> = std::result::Result<T, E>;

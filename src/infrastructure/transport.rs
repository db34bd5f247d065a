//! Transport capability boundary.
//!
//! The connector does not implement rendezvous, signaling or NAT
//! traversal itself. An embedder provides these traits (a WebRTC stack,
//! a relay client, or the in-memory mock used by the test suite) and the
//! connector drives them: open a named session, dial channels and calls,
//! consume the session's signal stream.

use crate::domain::PeerName;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Arbitrary JSON attached to call setup and teardown
pub type CallMetadata = serde_json::Value;

/// Errors reported by a transport implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("call rejected by remote peer")]
    CallRejected,

    #[error("not connected")]
    NotConnected,

    #[error("closed")]
    Closed,

    #[error("timed out")]
    Timeout,
}

/// Media payload source. The connector only routes streams between
/// endpoints; what a stream actually carries is the transport's
/// business.
pub trait StreamSource: Send + Sync {
    /// Stable identifier of this stream (track id, device label, ...)
    fn id(&self) -> &str;
}

/// Opaque handle to a live media stream
#[derive(Clone)]
pub struct MediaStream(Arc<dyn StreamSource>);

impl MediaStream {
    pub fn new(source: Arc<dyn StreamSource>) -> Self {
        Self(source)
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }

    pub fn source(&self) -> &Arc<dyn StreamSource> {
        &self.0
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MediaStream").field(&self.id()).finish()
    }
}

/// Notifications pushed by the transport while a session is open.
///
/// Delivered in transport order per peer; the connector consumes them
/// sequentially from a single pump task.
pub enum SessionSignal {
    /// Remote peer opened a reliable channel to us; it is already open.
    IncomingChannel {
        peer: PeerName,
        channel: Arc<dyn ChannelHandle>,
    },
    /// Remote peer is calling. Nothing is established until answered.
    IncomingCall {
        peer: PeerName,
        call: Arc<dyn IncomingCallHandle>,
        metadata: CallMetadata,
    },
    /// Payload arrived on the open channel from `peer`
    ChannelData { peer: PeerName, payload: Vec<u8> },
    /// The open channel from `peer` went away (either side closed)
    ChannelClosed { peer: PeerName },
    /// An established media call with `peer` ended (either side)
    CallClosed {
        peer: PeerName,
        metadata: CallMetadata,
    },
    /// Informational transport state churn (ICE and friends). Logged,
    /// never acted upon.
    TransportState {
        peer: Option<PeerName>,
        state: String,
    },
    /// The session itself is gone
    SessionClosed { reason: Option<String> },
}

impl fmt::Debug for SessionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionSignal::IncomingChannel { peer, .. } => {
                f.debug_struct("IncomingChannel").field("peer", peer).finish()
            }
            SessionSignal::IncomingCall { peer, .. } => {
                f.debug_struct("IncomingCall").field("peer", peer).finish()
            }
            SessionSignal::ChannelData { peer, payload } => f
                .debug_struct("ChannelData")
                .field("peer", peer)
                .field("bytes", &payload.len())
                .finish(),
            SessionSignal::ChannelClosed { peer } => {
                f.debug_struct("ChannelClosed").field("peer", peer).finish()
            }
            SessionSignal::CallClosed { peer, .. } => {
                f.debug_struct("CallClosed").field("peer", peer).finish()
            }
            SessionSignal::TransportState { peer, state } => f
                .debug_struct("TransportState")
                .field("peer", peer)
                .field("state", state)
                .finish(),
            SessionSignal::SessionClosed { reason } => f
                .debug_struct("SessionClosed")
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Entry point of the capability: opens named rendezvous sessions
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session under `local`. Resolves once the session is ready
    /// to originate and accept connections, errors before that.
    async fn open_session(&self, local: &PeerName)
        -> Result<Arc<dyn SessionHandle>, TransportError>;
}

/// A live rendezvous session owned by the local endpoint
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Open a reliable channel to `target`. Resolves when the channel
    /// is open, not merely created.
    async fn open_channel(
        &self,
        target: &PeerName,
    ) -> Result<Arc<dyn ChannelHandle>, TransportError>;

    /// Start a media call to `target`, offering `local`. Resolves once
    /// the remote stream is available; `CallRejected` when the remote
    /// declines.
    async fn open_call(
        &self,
        target: &PeerName,
        local: MediaStream,
    ) -> Result<Arc<dyn CallHandle>, TransportError>;

    /// Next notification, in transport order. `None` once the session
    /// is dead.
    async fn next_signal(&self) -> Option<SessionSignal>;

    async fn close(&self);
}

/// One open reliable channel to one remote peer
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    fn peer(&self) -> &PeerName;

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    async fn close(&self);
}

/// One established media call with one remote peer
#[async_trait]
pub trait CallHandle: Send + Sync {
    fn peer(&self) -> &PeerName;

    /// The stream the remote side is sending us
    fn remote_stream(&self) -> MediaStream;

    async fn close(&self);
}

/// An inbound call the transport has surfaced but nobody has answered
#[async_trait]
pub trait IncomingCallHandle: Send + Sync {
    fn peer(&self) -> &PeerName;

    /// Answer the call, offering `local`; resolves once the remote
    /// stream is available.
    async fn accept(&self, local: MediaStream) -> Result<Arc<dyn CallHandle>, TransportError>;

    /// Decline the call without establishing media
    async fn reject(&self);
}

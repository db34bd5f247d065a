//! Peer connection orchestration for named endpoints.
//!
//! A [`PeerConnector`] owns a local peer identity, keeps one rendezvous
//! session online, negotiates data channels and media calls with remote
//! peers through an injected [`Transport`], and re-emits everything as
//! events. Consumers never touch the transport directly.

// Domain layer (core)
pub mod domain;

// Application layer (use cases)
pub mod application;

// Infrastructure layer (adapters)
pub mod infrastructure;

// Re-exports for convenience
pub use application::{
    CallAnswer, Event, EventKind, EventRegistry, Handler, PeerConnector, SessionConfig,
    UnknownEvent,
};
pub use domain::{
    ConnectionRecord, ConnectionTable, NameError, NameGenerator, NameRegistry, PeerName,
};
pub use infrastructure::error::{
    ConnectorError, DataChannelError, MediaCallError, NotConnectedError, Result, SessionError,
};
pub use infrastructure::transport::{
    CallHandle, CallMetadata, ChannelHandle, IncomingCallHandle, MediaStream, SessionHandle,
    SessionSignal, StreamSource, Transport, TransportError,
};

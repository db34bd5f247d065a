mod channel;
mod config;
mod connector;
mod events;
mod media;

pub use config::SessionConfig;
pub use connector::PeerConnector;
pub use events::{Event, EventKind, EventRegistry, Handler, UnknownEvent};
pub use media::CallAnswer;

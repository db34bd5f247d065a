mod peer;
mod record;

pub use peer::{NameError, NameGenerator, NameRegistry, PeerName, MAX_NAME_LEN};
pub use record::{ConnectionRecord, ConnectionTable};

use colorid::colorid;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Maximum length of a peer name in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// How many colour ids to try before giving up and using a uuid tail.
const GENERATE_ATTEMPTS: usize = 8;

/// Validation failures for peer names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("peer name is empty")]
    Empty,

    #[error("peer name too long: {length} chars (max {max})")]
    TooLong { length: usize, max: usize },

    #[error("peer name contains invalid character '{ch}' at position {position}")]
    InvalidChar { ch: char, position: usize },
}

/// Domain entity: identifier of an endpoint in the rendezvous system.
///
/// Names are short and human-typable: 1..=64 ASCII letters, digits,
/// `-` or `_`. Whoever owns the name can be dialed with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerName(String);

impl PeerName {
    /// Parse and validate a peer name from a string
    pub fn parse(s: &str) -> Result<Self, NameError> {
        if s.is_empty() {
            return Err(NameError::Empty);
        }
        if s.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong {
                length: s.len(),
                max: MAX_NAME_LEN,
            });
        }
        for (position, ch) in s.chars().enumerate() {
            if !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_') {
                return Err(NameError::InvalidChar { ch, position });
            }
        }
        Ok(Self(s.to_string()))
    }

    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeerName {
    type Error = NameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PeerName> for String {
    fn from(name: PeerName) -> Self {
        name.0
    }
}

/// Process-scoped set of names that have already been handed out.
///
/// Shared explicitly (`Arc<NameRegistry>`) between whichever generators
/// need deduplication; passed in by the embedder rather than living in
/// module-level state.
#[derive(Debug, Default)]
pub struct NameRegistry {
    claimed: Mutex<HashSet<String>>,
}

impl NameRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim a name. Returns false if it was already taken.
    pub fn claim(&self, name: &PeerName) -> bool {
        self.claimed.lock().insert(name.as_str().to_string())
    }

    /// Release a previously claimed name
    pub fn release(&self, name: &PeerName) {
        self.claimed.lock().remove(name.as_str());
    }

    /// Number of names currently claimed
    pub fn len(&self) -> usize {
        self.claimed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.lock().is_empty()
    }
}

/// Generates human-typable endpoint names, deduplicated through an
/// injected [`NameRegistry`].
#[derive(Debug, Clone)]
pub struct NameGenerator {
    registry: Arc<NameRegistry>,
}

impl NameGenerator {
    pub fn new(registry: Arc<NameRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<NameRegistry> {
        &self.registry
    }

    /// Produce a fresh name and claim it in the registry.
    ///
    /// Colour-word ids are tried first; after a bounded number of
    /// collisions a uuid-tailed name is used instead, so generation
    /// never spins.
    pub fn generate(&self) -> PeerName {
        for _ in 0..GENERATE_ATTEMPTS {
            let candidate = colorid(2);
            if let Ok(name) = PeerName::parse(&candidate) {
                if self.registry.claim(&name) {
                    tracing::debug!("generated peer name {}", name);
                    return name;
                }
            }
        }
        let tail = Uuid::new_v4().simple().to_string();
        let name = PeerName(format!("peer-{}", &tail[..12]));
        self.registry.claim(&name);
        tracing::debug!("colour ids exhausted, generated peer name {}", name);
        name
    }
}

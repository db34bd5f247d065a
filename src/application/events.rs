use crate::application::media::CallAnswer;
use crate::domain::PeerName;
use crate::infrastructure::transport::{CallMetadata, ChannelHandle, MediaStream};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The event names a connector dispatches. The `as_str` values are the
/// stable consumer-facing contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Online,
    Offline,
    DataOpen,
    MediaOpen,
    Call,
    Hangup,
    Data,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Online => "online",
            EventKind::Offline => "offline",
            EventKind::DataOpen => "connecteddata",
            EventKind::MediaOpen => "connectedmedia",
            EventKind::Call => "call",
            EventKind::Hangup => "hangup",
            EventKind::Data => "data",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for EventKind {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(EventKind::Online),
            "offline" => Ok(EventKind::Offline),
            "connecteddata" => Ok(EventKind::DataOpen),
            "connectedmedia" => Ok(EventKind::MediaOpen),
            "call" => Ok(EventKind::Call),
            "hangup" => Ok(EventKind::Hangup),
            "data" => Ok(EventKind::Data),
            other => Err(UnknownEvent(other.to_string())),
        }
    }
}

/// A dispatched event with its payload
#[derive(Clone)]
pub enum Event {
    /// The local session became ready
    Online,
    /// The local session went away
    Offline,
    /// A data channel to `peer` opened (dialed or inbound)
    DataOpen {
        peer: PeerName,
        channel: Arc<dyn ChannelHandle>,
    },
    /// A media call with `peer` is established; `stream` is what the
    /// remote side sends us
    MediaOpen { peer: PeerName, stream: MediaStream },
    /// `peer` is calling; `answer` decides the call exactly once
    Call {
        peer: PeerName,
        answer: Arc<CallAnswer>,
        metadata: CallMetadata,
    },
    /// An established media call with `peer` ended
    Hangup {
        peer: PeerName,
        metadata: CallMetadata,
    },
    /// Payload received from `peer` on the open data channel
    Data { peer: PeerName, payload: Vec<u8> },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Online => EventKind::Online,
            Event::Offline => EventKind::Offline,
            Event::DataOpen { .. } => EventKind::DataOpen,
            Event::MediaOpen { .. } => EventKind::MediaOpen,
            Event::Call { .. } => EventKind::Call,
            Event::Hangup { .. } => EventKind::Hangup,
            Event::Data { .. } => EventKind::Data,
        }
    }

    /// The remote peer this event concerns, if any
    pub fn peer(&self) -> Option<&PeerName> {
        match self {
            Event::Online | Event::Offline => None,
            Event::DataOpen { peer, .. }
            | Event::MediaOpen { peer, .. }
            | Event::Call { peer, .. }
            | Event::Hangup { peer, .. }
            | Event::Data { peer, .. } => Some(peer),
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Event");
        debug.field("kind", &self.kind().as_str());
        if let Some(peer) = self.peer() {
            debug.field("peer", peer);
        }
        debug.finish()
    }
}

/// Listener callback. Held behind an `Arc` so the same callback object
/// can be registered, compared and removed by identity.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Listener {
    handler: Handler,
    once: bool,
    /// Cleared when the listener is removed or a once-listener fires.
    /// Checked again at invocation time so removals made while a
    /// dispatch is running are honored.
    alive: Arc<AtomicBool>,
}

/// Per-event listener store with one-shot support and synchronous,
/// registration-ordered dispatch.
///
/// Panic policy: a listener that panics is caught and logged, and the
/// remaining listeners for that dispatch still run. The panic is
/// swallowed, not re-raised; dispatch happens inside the connector's
/// signal pump, where unwinding would take the whole session down.
#[derive(Default)]
pub struct EventRegistry {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`. Registering the same handler
    /// (same `Arc`) with the same once-ness again is a no-op.
    pub fn add_listener(&self, kind: EventKind, handler: Handler) {
        self.add(kind, handler, false);
    }

    /// Register a handler that is dropped right after its first
    /// invocation
    pub fn add_once(&self, kind: EventKind, handler: Handler) {
        self.add(kind, handler, true);
    }

    fn add(&self, kind: EventKind, handler: Handler, once: bool) {
        let mut listeners = self.listeners.lock();
        let entries = listeners.entry(kind).or_default();
        let already = entries.iter().any(|l| {
            l.alive.load(Ordering::SeqCst) && l.once == once && Arc::ptr_eq(&l.handler, &handler)
        });
        if already {
            tracing::debug!("listener for {} already registered", kind);
            return;
        }
        entries.push(Listener {
            handler,
            once,
            alive: Arc::new(AtomicBool::new(true)),
        });
    }

    /// Remove the first live `(handler, once)` match for `kind`; no-op
    /// when absent. Safe to call from inside a running dispatch.
    pub fn remove_listener(&self, kind: EventKind, handler: &Handler, once: bool) {
        let mut listeners = self.listeners.lock();
        if let Some(entries) = listeners.get_mut(&kind) {
            if let Some(position) = entries.iter().position(|l| {
                l.alive.load(Ordering::SeqCst) && l.once == once && Arc::ptr_eq(&l.handler, handler)
            }) {
                entries[position].alive.store(false, Ordering::SeqCst);
                entries.remove(position);
                if entries.is_empty() {
                    listeners.remove(&kind);
                }
            }
        }
    }

    /// Number of live listeners for `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .lock()
            .get(&kind)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|l| l.alive.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Invoke every listener registered for the event's kind,
    /// synchronously, in registration order.
    ///
    /// Dispatch runs against a snapshot taken on entry: listeners added
    /// during the dispatch fire from the next dispatch on, listeners
    /// removed during the dispatch no longer fire. Once-listeners are
    /// consumed before their invocation (so one that re-registers
    /// itself from its own handler is not re-invoked in the same
    /// dispatch) and purged afterwards, whether or not they panicked.
    pub fn dispatch(&self, event: &Event) {
        let kind = event.kind();
        let snapshot: Vec<(Handler, Arc<AtomicBool>, bool)> = {
            let listeners = self.listeners.lock();
            match listeners.get(&kind) {
                Some(entries) => entries
                    .iter()
                    .map(|l| (l.handler.clone(), l.alive.clone(), l.once))
                    .collect(),
                None => return,
            }
        };

        for (handler, alive, once) in snapshot {
            let may_fire = if once {
                alive.swap(false, Ordering::SeqCst)
            } else {
                alive.load(Ordering::SeqCst)
            };
            if !may_fire {
                continue;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let what = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!("listener for {} panicked: {}", kind, what);
            }
        }

        let mut listeners = self.listeners.lock();
        if let Some(entries) = listeners.get_mut(&kind) {
            entries.retain(|l| l.alive.load(Ordering::SeqCst));
            if entries.is_empty() {
                listeners.remove(&kind);
            }
        }
    }
}

use crate::application::channel::PendingDial;
use crate::application::config::SessionConfig;
use crate::application::events::{Event, EventKind, EventRegistry, Handler};
use crate::domain::{ConnectionTable, NameGenerator, NameRegistry, PeerName};
use crate::infrastructure::error::{
    ConnectorError, DataChannelError, MediaCallError, NotConnectedError, SessionError,
};
use crate::infrastructure::transport::{
    CallMetadata, MediaStream, SessionHandle, SessionSignal, Transport,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::timeout;

type SharedOpen = Shared<BoxFuture<'static, Result<Arc<dyn SessionHandle>, SessionError>>>;

enum SessionSlot {
    Offline,
    Connecting(SharedOpen),
    Online(Arc<dyn SessionHandle>),
}

/// Orchestrates a local peer: one rendezvous session, per-peer data and
/// media channels, and the event stream consumers subscribe to.
///
/// Cheap to clone; clones share the same session and listener state.
#[derive(Clone)]
pub struct PeerConnector {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) config: SessionConfig,
    pub(crate) registry: EventRegistry,
    pub(crate) table: Mutex<ConnectionTable>,
    pub(crate) dials: Mutex<HashMap<PeerName, PendingDial>>,
    transport: Arc<dyn Transport>,
    session: Mutex<SessionSlot>,
    identity: Mutex<Option<PeerName>>,
    names: NameGenerator,
    /// Bumped on every teardown; fences stale pumps and late opens
    generation: AtomicU64,
}

impl PeerConnector {
    /// Build a connector over `transport`. The name registry is shared,
    /// process-scoped state owned by the embedder and passed in.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        names: Arc<NameRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: EventRegistry::new(),
                table: Mutex::new(ConnectionTable::new()),
                dials: Mutex::new(HashMap::new()),
                transport,
                session: Mutex::new(SessionSlot::Offline),
                identity: Mutex::new(None),
                names: NameGenerator::new(names),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Local peer name, once one has been fixed or generated
    pub fn peer_name(&self) -> Option<PeerName> {
        self.inner.identity.lock().clone()
    }

    pub fn is_online(&self) -> bool {
        matches!(*self.inner.session.lock(), SessionSlot::Online(_))
    }

    /// Peers with at least one open channel
    pub fn connected_peers(&self) -> Vec<PeerName> {
        self.inner.table.lock().peers()
    }

    /// True while a data channel to `peer` is open
    pub fn has_channel(&self, peer: &PeerName) -> bool {
        self.inner.table.lock().data_channel(peer).is_some()
    }

    /// True while a media call with `peer` is established
    pub fn has_media(&self, peer: &PeerName) -> bool {
        self.inner.table.lock().media_call(peer).is_some()
    }

    /// Bring the session online (idempotent) and, when `target` is
    /// given, make sure a data channel to it exists.
    ///
    /// Calling this again while a connect is already in flight joins
    /// the pending completion instead of opening a second session.
    pub async fn connect(&self, target: Option<&PeerName>) -> Result<(), ConnectorError> {
        let session = self.inner.clone().ensure_session().await?;
        if let Some(peer) = target {
            self.inner.clone().ensure_channel(&session, peer).await?;
        }
        Ok(())
    }

    /// With no target: full teardown. Every channel is closed, the
    /// session released, `offline` emitted. With a target: close only
    /// that peer's channels; the session and other peers stay up.
    pub async fn disconnect(&self, target: Option<&PeerName>) {
        match target {
            None => self.inner.teardown(None).await,
            Some(peer) => self.inner.drop_peer(peer).await,
        }
    }

    /// Send a text message to `peer`, establishing the data channel
    /// first if there is none.
    pub async fn send_message(&self, peer: &PeerName, text: &str) -> Result<(), NotConnectedError> {
        self.send_payload(peer, text.as_bytes().to_vec()).await
    }

    /// Send a binary blob to `peer`, establishing the data channel
    /// first if there is none.
    pub async fn send_file(&self, peer: &PeerName, blob: Vec<u8>) -> Result<(), NotConnectedError> {
        self.send_payload(peer, blob).await
    }

    async fn send_payload(&self, peer: &PeerName, payload: Vec<u8>) -> Result<(), NotConnectedError> {
        let establish = async {
            let session = self.inner.clone().ensure_session().await?;
            let channel = self.inner.clone().ensure_channel(&session, peer).await?;
            Ok::<_, ConnectorError>(channel)
        };
        let channel = establish.await.map_err(|source| NotConnectedError {
            peer: peer.clone(),
            source,
        })?;
        channel
            .send(payload)
            .await
            .map_err(|source| NotConnectedError {
                peer: peer.clone(),
                source: ConnectorError::Data(DataChannelError::Transport {
                    peer: peer.clone(),
                    source,
                }),
            })
    }

    /// Start a media call to `peer`, offering `local`. Resolves with
    /// the stream the remote side sends back.
    pub async fn call(
        &self,
        peer: &PeerName,
        local: MediaStream,
    ) -> Result<MediaStream, MediaCallError> {
        self.inner.clone().call_peer(peer, local).await
    }

    /// Register `handler` for `kind` events
    pub fn add_listener(&self, kind: EventKind, handler: Handler) {
        self.inner.registry.add_listener(kind, handler);
    }

    /// Register a handler that fires once and is then dropped
    pub fn add_once(&self, kind: EventKind, handler: Handler) {
        self.inner.registry.add_once(kind, handler);
    }

    /// Remove a previously registered handler
    pub fn remove_listener(&self, kind: EventKind, handler: &Handler, once: bool) {
        self.inner.registry.remove_listener(kind, handler, once);
    }
}

impl Inner {
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The local name, fixed on first use. Sticky across reconnects; a
    /// fresh one would only come from a fresh connector.
    fn local_name(&self) -> PeerName {
        let mut identity = self.identity.lock();
        if let Some(name) = identity.as_ref() {
            return name.clone();
        }
        let name = match &self.config.name {
            Some(fixed) => fixed.clone(),
            None => self.names.generate(),
        };
        *identity = Some(name.clone());
        name
    }

    /// Resolve to the online session, opening one if needed. Callers
    /// arriving while the open is in flight share the same completion,
    /// so at most one transport open is ever running.
    pub(crate) async fn ensure_session(
        self: Arc<Self>,
    ) -> Result<Arc<dyn SessionHandle>, SessionError> {
        let pending = {
            let mut slot = self.session.lock();
            match &*slot {
                SessionSlot::Online(handle) => return Ok(handle.clone()),
                SessionSlot::Connecting(shared) => shared.clone(),
                SessionSlot::Offline => {
                    let shared = self.clone().start_open();
                    *slot = SessionSlot::Connecting(shared.clone());
                    shared
                }
            }
        };
        pending.await
    }

    fn start_open(self: Arc<Self>) -> SharedOpen {
        let inner = self;
        async move {
            let name = inner.local_name();
            let generation = inner.generation();
            tracing::info!("opening rendezvous session as {}", name);

            let opened = timeout(
                inner.config.open_timeout,
                inner.transport.open_session(&name),
            )
            .await;
            let handle = match opened {
                Err(_) => {
                    inner.reset_connecting();
                    tracing::warn!("session open as {} timed out", name);
                    return Err(SessionError::Timeout);
                }
                Ok(Err(source)) => {
                    inner.reset_connecting();
                    tracing::warn!("session open as {} failed: {}", name, source);
                    return Err(SessionError::Transport(source));
                }
                Ok(Ok(handle)) => handle,
            };

            {
                let mut slot = inner.session.lock();
                if inner.generation() != generation {
                    drop(slot);
                    tracing::debug!("session for {} opened after teardown, discarding", name);
                    let stale = handle.clone();
                    tokio::spawn(async move { stale.close().await });
                    return Err(SessionError::Aborted);
                }
                *slot = SessionSlot::Online(handle.clone());
            }
            inner.clone().spawn_pump(handle.clone(), generation);
            tracing::info!("session online as {}", name);
            inner.registry.dispatch(&Event::Online);
            Ok(handle)
        }
        .boxed()
        .shared()
    }

    fn reset_connecting(&self) {
        let mut slot = self.session.lock();
        if matches!(*slot, SessionSlot::Connecting(_)) {
            *slot = SessionSlot::Offline;
        }
    }

    /// One pump per session: consumes the transport's signal stream
    /// until it dries up. A stale pump (session already torn down)
    /// drops out without touching anything.
    fn spawn_pump(self: Arc<Self>, session: Arc<dyn SessionHandle>, generation: u64) {
        let inner = self;
        tokio::spawn(async move {
            while let Some(signal) = session.next_signal().await {
                if inner.generation() != generation {
                    tracing::debug!("stale signal pump exiting");
                    return;
                }
                inner.clone().handle_signal(signal).await;
            }
            if inner.generation() == generation {
                tracing::warn!("transport closed the session");
                inner.teardown(Some("transport closed".to_string())).await;
            }
        });
    }

    async fn handle_signal(self: Arc<Self>, signal: SessionSignal) {
        match signal {
            SessionSignal::IncomingChannel { peer, channel } => {
                self.adopt_channel(&peer, channel);
            }
            SessionSignal::IncomingCall {
                peer,
                call,
                metadata,
            } => {
                self.incoming_call(peer, call, metadata);
            }
            SessionSignal::ChannelData { peer, payload } => {
                self.channel_data(peer, payload);
            }
            SessionSignal::ChannelClosed { peer } => {
                self.channel_closed(&peer);
            }
            SessionSignal::CallClosed { peer, metadata } => {
                self.call_closed(&peer, metadata);
            }
            SessionSignal::TransportState { peer, state } => match peer {
                Some(peer) => tracing::debug!("transport state for {}: {}", peer, state),
                None => tracing::debug!("transport state: {}", state),
            },
            SessionSignal::SessionClosed { reason } => {
                self.teardown(reason.or_else(|| Some("session closed".to_string())))
                    .await;
            }
        }
    }

    /// Tear everything down. `offline` is emitted only when the session
    /// was actually online.
    pub(crate) async fn teardown(&self, reason: Option<String>) {
        let previous = {
            let mut slot = self.session.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            mem::replace(&mut *slot, SessionSlot::Offline)
        };

        let dials: Vec<PendingDial> = self.dials.lock().drain().map(|(_, dial)| dial).collect();
        for dial in &dials {
            dial.cancelled.store(true, Ordering::SeqCst);
        }

        let records = self.table.lock().drain_all();
        for (peer, record) in records {
            if let Some(channel) = record.data_channel() {
                channel.close().await;
            }
            if let Some(call) = record.media_call() {
                call.close().await;
            }
            tracing::debug!("closed channels to {}", peer);
        }

        match previous {
            SessionSlot::Online(handle) => {
                handle.close().await;
                match reason {
                    Some(reason) => tracing::info!("session offline: {}", reason),
                    None => tracing::info!("session offline"),
                }
                self.registry.dispatch(&Event::Offline);
            }
            SessionSlot::Connecting(_) => {
                tracing::debug!("teardown while still connecting");
            }
            SessionSlot::Offline => {}
        }
    }

    /// Close one peer's channels and drop its record. Never touches the
    /// session or other peers, never emits `offline`.
    pub(crate) async fn drop_peer(&self, peer: &PeerName) {
        if let Some(dial) = self.dials.lock().remove(peer) {
            dial.cancelled.store(true, Ordering::SeqCst);
        }

        let record = self.table.lock().remove(peer);
        let Some(record) = record else {
            tracing::debug!("disconnect for unknown peer {}", peer);
            return;
        };
        if let Some(channel) = record.data_channel() {
            channel.close().await;
        }
        if let Some(call) = record.media_call() {
            call.close().await;
            self.registry.dispatch(&Event::Hangup {
                peer: peer.clone(),
                metadata: CallMetadata::Null,
            });
        }
        tracing::info!("disconnected from {}", peer);
    }
}

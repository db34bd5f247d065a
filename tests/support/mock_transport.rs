//! In-memory stand-in for the rendezvous/transport capability.
//!
//! All state hangs off an explicitly shared [`MockNetwork`]; tests
//! create one and hand it to every participant. Sessions are paired by
//! peer name, channels deliver synchronously, calls are answered
//! through a oneshot decision.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use visavis::{
    CallHandle, CallMetadata, ChannelHandle, IncomingCallHandle, MediaStream, PeerName,
    SessionHandle, SessionSignal, StreamSource, Transport, TransportError,
};

pub struct MockNetwork {
    state: Mutex<NetworkState>,
    opens: AtomicUsize,
}

struct NetworkState {
    sessions: HashMap<PeerName, mpsc::UnboundedSender<SessionSignal>>,
    fail_next_open: Option<TransportError>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NetworkState {
                sessions: HashMap::new(),
                fail_next_open: None,
            }),
            opens: AtomicUsize::new(0),
        })
    }

    /// Number of sessions opened so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make the next `open_session` fail with `error`
    pub fn fail_next_open(&self, error: TransportError) {
        self.state.lock().unwrap().fail_next_open = Some(error);
    }

    /// Push a raw signal into `target`'s session, as if the transport
    /// had reported it (useful for duplicate-close tests).
    pub fn inject_signal(&self, target: &PeerName, signal: SessionSignal) {
        self.deliver(target, signal);
    }

    fn deliver(&self, target: &PeerName, signal: SessionSignal) -> bool {
        let state = self.state.lock().unwrap();
        match state.sessions.get(target) {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }

    fn drop_session(&self, name: &PeerName) {
        self.state.lock().unwrap().sessions.remove(name);
    }
}

pub struct MockTransport {
    network: Arc<MockNetwork>,
}

impl MockTransport {
    pub fn new(network: Arc<MockNetwork>) -> Arc<Self> {
        Arc::new(Self { network })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_session(
        &self,
        local: &PeerName,
    ) -> Result<Arc<dyn SessionHandle>, TransportError> {
        self.network.opens.fetch_add(1, Ordering::SeqCst);
        // a real rendezvous round-trips; give concurrent callers a
        // chance to pile onto the same pending open
        tokio::task::yield_now().await;
        if let Some(error) = self.network.state.lock().unwrap().fail_next_open.take() {
            return Err(error);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.network
            .state
            .lock()
            .unwrap()
            .sessions
            .insert(local.clone(), tx);
        Ok(Arc::new(MockSession {
            name: local.clone(),
            network: self.network.clone(),
            signals: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MockSession {
    name: PeerName,
    network: Arc<MockNetwork>,
    signals: tokio::sync::Mutex<mpsc::UnboundedReceiver<SessionSignal>>,
    closed: AtomicBool,
}

#[async_trait]
impl SessionHandle for MockSession {
    async fn open_channel(
        &self,
        target: &PeerName,
    ) -> Result<Arc<dyn ChannelHandle>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let open = Arc::new(AtomicBool::new(true));
        let ours = Arc::new(MockChannel {
            local: self.name.clone(),
            remote: target.clone(),
            network: self.network.clone(),
            open: open.clone(),
        });
        let theirs = Arc::new(MockChannel {
            local: target.clone(),
            remote: self.name.clone(),
            network: self.network.clone(),
            open,
        });
        let delivered = self.network.deliver(
            target,
            SessionSignal::IncomingChannel {
                peer: self.name.clone(),
                channel: theirs,
            },
        );
        if !delivered {
            return Err(TransportError::ConnectionFailed(format!(
                "no session named {target}"
            )));
        }
        Ok(ours)
    }

    async fn open_call(
        &self,
        target: &PeerName,
        local: MediaStream,
    ) -> Result<Arc<dyn CallHandle>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let (decision_tx, decision_rx) = oneshot::channel();
        let incoming = Arc::new(MockIncomingCall {
            caller: self.name.clone(),
            callee: target.clone(),
            caller_stream: local,
            network: self.network.clone(),
            decision: Mutex::new(Some(decision_tx)),
        });
        let metadata = serde_json::json!({ "from": self.name.as_str() });
        let delivered = self.network.deliver(
            target,
            SessionSignal::IncomingCall {
                peer: self.name.clone(),
                call: incoming,
                metadata,
            },
        );
        if !delivered {
            return Err(TransportError::ConnectionFailed(format!(
                "no session named {target}"
            )));
        }
        match decision_rx.await {
            Ok(Decision::Accepted {
                callee_stream,
                live,
            }) => Ok(Arc::new(MockCall {
                local: self.name.clone(),
                remote: target.clone(),
                remote_stream: callee_stream,
                network: self.network.clone(),
                live,
            })),
            Ok(Decision::Rejected) => Err(TransportError::CallRejected),
            Err(_) => Err(TransportError::Closed),
        }
    }

    async fn next_signal(&self) -> Option<SessionSignal> {
        self.signals.lock().await.recv().await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.network.drop_session(&self.name);
    }
}

pub struct MockChannel {
    /// Owner of this half
    local: PeerName,
    remote: PeerName,
    network: Arc<MockNetwork>,
    /// Shared between both halves
    open: Arc<AtomicBool>,
}

#[async_trait]
impl ChannelHandle for MockChannel {
    fn peer(&self) -> &PeerName {
        &self.remote
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let delivered = self.network.deliver(
            &self.remote,
            SessionSignal::ChannelData {
                peer: self.local.clone(),
                payload,
            },
        );
        if !delivered {
            return Err(TransportError::SendFailed(format!(
                "no session named {}",
                self.remote
            )));
        }
        Ok(())
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.network.deliver(
                &self.remote,
                SessionSignal::ChannelClosed {
                    peer: self.local.clone(),
                },
            );
        }
    }
}

enum Decision {
    Accepted {
        callee_stream: MediaStream,
        live: Arc<AtomicBool>,
    },
    Rejected,
}

pub struct MockIncomingCall {
    caller: PeerName,
    callee: PeerName,
    caller_stream: MediaStream,
    network: Arc<MockNetwork>,
    decision: Mutex<Option<oneshot::Sender<Decision>>>,
}

#[async_trait]
impl IncomingCallHandle for MockIncomingCall {
    fn peer(&self) -> &PeerName {
        &self.caller
    }

    async fn accept(&self, local: MediaStream) -> Result<Arc<dyn CallHandle>, TransportError> {
        let tx = self
            .decision
            .lock()
            .unwrap()
            .take()
            .ok_or(TransportError::Closed)?;
        let live = Arc::new(AtomicBool::new(true));
        let ours = Arc::new(MockCall {
            local: self.callee.clone(),
            remote: self.caller.clone(),
            remote_stream: self.caller_stream.clone(),
            network: self.network.clone(),
            live: live.clone(),
        });
        tx.send(Decision::Accepted {
            callee_stream: local,
            live,
        })
        .map_err(|_| TransportError::Closed)?;
        Ok(ours)
    }

    async fn reject(&self) {
        if let Some(tx) = self.decision.lock().unwrap().take() {
            let _ = tx.send(Decision::Rejected);
        }
    }
}

pub struct MockCall {
    local: PeerName,
    remote: PeerName,
    remote_stream: MediaStream,
    network: Arc<MockNetwork>,
    /// Shared between both halves; only the first close notifies
    live: Arc<AtomicBool>,
}

#[async_trait]
impl CallHandle for MockCall {
    fn peer(&self) -> &PeerName {
        &self.remote
    }

    fn remote_stream(&self) -> MediaStream {
        self.remote_stream.clone()
    }

    async fn close(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.network.deliver(
                &self.remote,
                SessionSignal::CallClosed {
                    peer: self.local.clone(),
                    metadata: CallMetadata::Null,
                },
            );
        }
    }
}

pub struct MockStream {
    id: String,
}

impl MockStream {
    /// A media stream carrying nothing but its id
    pub fn stream(id: &str) -> MediaStream {
        MediaStream::new(Arc::new(Self { id: id.to_string() }))
    }
}

impl StreamSource for MockStream {
    fn id(&self) -> &str {
        &self.id
    }
}

use crate::application::connector::Inner;
use crate::application::events::Event;
use crate::domain::PeerName;
use crate::infrastructure::error::MediaCallError;
use crate::infrastructure::transport::{
    CallHandle, CallMetadata, IncomingCallHandle, MediaStream, TransportError,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::time::timeout;

/// Single-use decision token for an inbound call.
///
/// Handed to consumers inside the `call` event. The first `accept` or
/// `reject` consumes it; any further use fails with `AlreadyAnswered`.
pub struct CallAnswer {
    peer: PeerName,
    state: Mutex<AnswerState>,
}

enum AnswerState {
    Pending {
        call: Arc<dyn IncomingCallHandle>,
        connector: Weak<Inner>,
        generation: u64,
    },
    Spent,
}

impl CallAnswer {
    pub(crate) fn new(
        peer: PeerName,
        call: Arc<dyn IncomingCallHandle>,
        connector: Weak<Inner>,
        generation: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer,
            state: Mutex::new(AnswerState::Pending {
                call,
                connector,
                generation,
            }),
        })
    }

    /// The peer that is calling
    pub fn peer(&self) -> &PeerName {
        &self.peer
    }

    /// True once the token has been used
    pub fn is_spent(&self) -> bool {
        matches!(*self.state.lock(), AnswerState::Spent)
    }

    fn take(&self) -> Option<(Arc<dyn IncomingCallHandle>, Weak<Inner>, u64)> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, AnswerState::Spent) {
            AnswerState::Pending {
                call,
                connector,
                generation,
            } => Some((call, connector, generation)),
            AnswerState::Spent => None,
        }
    }

    /// Answer the call, offering `local`. Resolves with the remote
    /// stream; the connector (if still around) records the established
    /// call and emits `connectedmedia`.
    pub async fn accept(&self, local: MediaStream) -> Result<MediaStream, MediaCallError> {
        let (call, connector, generation) = self
            .take()
            .ok_or_else(|| MediaCallError::AlreadyAnswered(self.peer.clone()))?;

        let established = call
            .accept(local)
            .await
            .map_err(|source| MediaCallError::Transport {
                peer: self.peer.clone(),
                source,
            })?;
        let remote = established.remote_stream();

        // the token may outlive the connector; the stream still resolves
        match connector.upgrade() {
            Some(inner) => inner.record_media(&self.peer, established, generation, remote.clone()),
            None => tracing::debug!("call from {} accepted after connector shutdown", self.peer),
        }
        Ok(remote)
    }

    /// Decline the call. Nothing is established, no record is created.
    pub async fn reject(&self) -> Result<(), MediaCallError> {
        let (call, _, _) = self
            .take()
            .ok_or_else(|| MediaCallError::AlreadyAnswered(self.peer.clone()))?;
        call.reject().await;
        tracing::debug!("inbound call from {} rejected", self.peer);
        Ok(())
    }
}

impl Inner {
    /// Outbound media call: session and data channel first, then the
    /// call itself.
    pub(crate) async fn call_peer(
        self: Arc<Self>,
        peer: &PeerName,
        local: MediaStream,
    ) -> Result<MediaStream, MediaCallError> {
        let session = self.clone().ensure_session().await?;
        self.clone().ensure_channel(&session, peer).await?;

        tracing::debug!("starting media call to {} offering {}", peer, local.id());
        let opened = timeout(self.config.call_timeout, session.open_call(peer, local)).await;
        let call = match opened {
            Err(_) => {
                tracing::warn!("media call to {} timed out", peer);
                return Err(MediaCallError::Timeout(peer.clone()));
            }
            Ok(Err(TransportError::CallRejected)) => {
                tracing::info!("call to {} declined", peer);
                return Err(MediaCallError::Rejected(peer.clone()));
            }
            Ok(Err(source)) => {
                tracing::warn!("media call to {} failed: {}", peer, source);
                return Err(MediaCallError::Transport {
                    peer: peer.clone(),
                    source,
                });
            }
            Ok(Ok(call)) => call,
        };

        let remote = call.remote_stream();
        let generation = self.generation();
        self.record_media(peer, call, generation, remote.clone());
        Ok(remote)
    }

    /// Store an established call, then announce it. The record is
    /// updated before the dispatch so listeners observe a consistent
    /// table.
    pub(crate) fn record_media(
        &self,
        peer: &PeerName,
        call: Arc<dyn CallHandle>,
        generation: u64,
        remote: MediaStream,
    ) {
        if self.generation() != generation {
            tracing::warn!("media call with {} established against a torn-down session", peer);
            tokio::spawn(async move { call.close().await });
            return;
        }
        if self.table.lock().set_media(peer, call).is_some() {
            tracing::debug!("replaced existing media call with {}", peer);
        }
        tracing::info!("media call with {} established", peer);
        self.registry.dispatch(&Event::MediaOpen {
            peer: peer.clone(),
            stream: remote,
        });
    }

    /// Inbound call: surface the decision to the consumer, never
    /// auto-answer.
    pub(crate) fn incoming_call(
        self: Arc<Self>,
        peer: PeerName,
        call: Arc<dyn IncomingCallHandle>,
        metadata: CallMetadata,
    ) {
        tracing::info!("incoming call from {}", peer);
        let answer = CallAnswer::new(peer.clone(), call, Arc::downgrade(&self), self.generation());
        self.registry.dispatch(&Event::Call {
            peer,
            answer,
            metadata,
        });
    }

    /// An established call ended. `hangup` fires at most once per
    /// establishment: clearing an already-empty slot emits nothing, so
    /// duplicate close signals are absorbed.
    pub(crate) fn call_closed(&self, peer: &PeerName, metadata: CallMetadata) {
        if self.table.lock().clear_media(peer).is_some() {
            tracing::info!("media call with {} ended", peer);
            self.registry.dispatch(&Event::Hangup {
                peer: peer.clone(),
                metadata,
            });
        } else {
            tracing::debug!("duplicate call close for {} ignored", peer);
        }
    }
}

use crate::application::connector::Inner;
use crate::application::events::Event;
use crate::domain::PeerName;
use crate::infrastructure::error::DataChannelError;
use crate::infrastructure::transport::{ChannelHandle, SessionHandle};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::timeout;

pub(crate) type SharedDial =
    Shared<BoxFuture<'static, Result<Arc<dyn ChannelHandle>, DataChannelError>>>;

/// A dial in flight: the shared completion plus an abandon flag set by
/// targeted disconnects.
pub(crate) struct PendingDial {
    pub(crate) future: SharedDial,
    pub(crate) cancelled: Arc<AtomicBool>,
}

impl Inner {
    /// Resolve to the open data channel for `peer`, dialing one if
    /// needed. Concurrent callers for the same peer share a single
    /// dial; a failed dial leaves no record behind.
    pub(crate) async fn ensure_channel(
        self: Arc<Self>,
        session: &Arc<dyn SessionHandle>,
        peer: &PeerName,
    ) -> Result<Arc<dyn ChannelHandle>, DataChannelError> {
        if let Some(channel) = self.table.lock().data_channel(peer) {
            return Ok(channel);
        }

        let dial = {
            let mut dials = self.dials.lock();
            match dials.get(peer) {
                Some(pending) => pending.future.clone(),
                None => {
                    let cancelled = Arc::new(AtomicBool::new(false));
                    let future =
                        self.clone()
                            .start_dial(session.clone(), peer.clone(), cancelled.clone());
                    dials.insert(
                        peer.clone(),
                        PendingDial {
                            future: future.clone(),
                            cancelled,
                        },
                    );
                    future
                }
            }
        };
        dial.await
    }

    fn start_dial(
        self: Arc<Self>,
        session: Arc<dyn SessionHandle>,
        peer: PeerName,
        cancelled: Arc<AtomicBool>,
    ) -> SharedDial {
        let inner = self;
        let channel_timeout = inner.config.channel_timeout;
        async move {
            tracing::debug!("opening data channel to {}", peer);
            let opened = timeout(channel_timeout, session.open_channel(&peer)).await;
            let channel = match opened {
                Err(_) => {
                    inner.dials.lock().remove(&peer);
                    tracing::warn!("data channel open to {} timed out", peer);
                    return Err(DataChannelError::Timeout(peer));
                }
                Ok(Err(source)) => {
                    inner.dials.lock().remove(&peer);
                    tracing::warn!("data channel open to {} failed: {}", peer, source);
                    return Err(DataChannelError::Transport { peer, source });
                }
                Ok(Ok(channel)) => channel,
            };
            if cancelled.load(Ordering::SeqCst) {
                inner.dials.lock().remove(&peer);
                tracing::debug!("dial to {} abandoned, closing channel", peer);
                channel.close().await;
                return Err(DataChannelError::Aborted(peer));
            }
            inner.adopt_channel(&peer, channel.clone());
            inner.dials.lock().remove(&peer);
            Ok(channel)
        }
        .boxed()
        .shared()
    }

    /// Store an open channel, then announce it. Dialed and inbound
    /// channels both land here.
    pub(crate) fn adopt_channel(&self, peer: &PeerName, channel: Arc<dyn ChannelHandle>) {
        if self.table.lock().set_data(peer, channel.clone()).is_some() {
            tracing::debug!("replaced existing data channel to {}", peer);
        }
        tracing::info!("data channel to {} open", peer);
        self.registry.dispatch(&Event::DataOpen {
            peer: peer.clone(),
            channel,
        });
    }

    /// Payload received from `peer`
    pub(crate) fn channel_data(&self, peer: PeerName, payload: Vec<u8>) {
        tracing::trace!("{} bytes from {}", payload.len(), peer);
        self.registry.dispatch(&Event::Data { peer, payload });
    }

    /// The data channel for `peer` went away. Only the data slot is
    /// cleared; a media call with the same peer stays up.
    pub(crate) fn channel_closed(&self, peer: &PeerName) {
        if self.table.lock().clear_data(peer).is_some() {
            tracing::debug!("data channel to {} closed", peer);
        }
    }
}

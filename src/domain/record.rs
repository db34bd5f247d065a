use crate::domain::PeerName;
use crate::infrastructure::transport::{CallHandle, ChannelHandle};
use instant::Instant;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Per-peer bundle of the currently open channel handles.
///
/// The two slots are independent: losing the media call does not touch
/// the data channel, and vice versa.
#[derive(Clone)]
pub struct ConnectionRecord {
    data: Option<Arc<dyn ChannelHandle>>,
    media: Option<Arc<dyn CallHandle>>,
    /// When the first slot for this peer was filled
    pub opened_at: Instant,
}

impl ConnectionRecord {
    fn new() -> Self {
        Self {
            data: None,
            media: None,
            opened_at: Instant::now(),
        }
    }

    pub fn data_channel(&self) -> Option<&Arc<dyn ChannelHandle>> {
        self.data.as_ref()
    }

    pub fn media_call(&self) -> Option<&Arc<dyn CallHandle>> {
        self.media.as_ref()
    }

    fn is_empty(&self) -> bool {
        self.data.is_none() && self.media.is_none()
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("data", &self.data.is_some())
            .field("media", &self.media.is_some())
            .finish()
    }
}

/// Keeps one [`ConnectionRecord`] per remote peer.
///
/// A record exists only while at least one of its slots is occupied;
/// clearing the last slot removes the record entirely, so the table
/// never holds empty records.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    records: HashMap<PeerName, ConnectionRecord>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_channel(&self, peer: &PeerName) -> Option<Arc<dyn ChannelHandle>> {
        self.records.get(peer).and_then(|r| r.data.clone())
    }

    pub fn media_call(&self, peer: &PeerName) -> Option<Arc<dyn CallHandle>> {
        self.records.get(peer).and_then(|r| r.media.clone())
    }

    /// Fill the data slot, returning whatever it held before
    pub fn set_data(
        &mut self,
        peer: &PeerName,
        channel: Arc<dyn ChannelHandle>,
    ) -> Option<Arc<dyn ChannelHandle>> {
        self.records
            .entry(peer.clone())
            .or_insert_with(ConnectionRecord::new)
            .data
            .replace(channel)
    }

    /// Fill the media slot, returning whatever it held before
    pub fn set_media(
        &mut self,
        peer: &PeerName,
        call: Arc<dyn CallHandle>,
    ) -> Option<Arc<dyn CallHandle>> {
        self.records
            .entry(peer.clone())
            .or_insert_with(ConnectionRecord::new)
            .media
            .replace(call)
    }

    /// Empty the data slot; the record goes away if media is empty too
    pub fn clear_data(&mut self, peer: &PeerName) -> Option<Arc<dyn ChannelHandle>> {
        let record = self.records.get_mut(peer)?;
        let handle = record.data.take();
        if record.is_empty() {
            self.records.remove(peer);
        }
        handle
    }

    /// Empty the media slot; the record goes away if data is empty too
    pub fn clear_media(&mut self, peer: &PeerName) -> Option<Arc<dyn CallHandle>> {
        let record = self.records.get_mut(peer)?;
        let handle = record.media.take();
        if record.is_empty() {
            self.records.remove(peer);
        }
        handle
    }

    /// Remove a peer's record completely
    pub fn remove(&mut self, peer: &PeerName) -> Option<ConnectionRecord> {
        self.records.remove(peer)
    }

    /// Take every record out of the table (session teardown)
    pub fn drain_all(&mut self) -> Vec<(PeerName, ConnectionRecord)> {
        self.records.drain().collect()
    }

    pub fn contains(&self, peer: &PeerName) -> bool {
        self.records.contains_key(peer)
    }

    pub fn peers(&self) -> Vec<PeerName> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::{MediaStream, StreamSource, TransportError};
    use async_trait::async_trait;

    struct NullChannel(PeerName);

    #[async_trait]
    impl ChannelHandle for NullChannel {
        fn peer(&self) -> &PeerName {
            &self.0
        }

        async fn send(&self, _payload: Vec<u8>) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) {}
    }

    struct NullStream;

    impl StreamSource for NullStream {
        fn id(&self) -> &str {
            "null"
        }
    }

    struct NullCall(PeerName);

    #[async_trait]
    impl CallHandle for NullCall {
        fn peer(&self) -> &PeerName {
            &self.0
        }

        fn remote_stream(&self) -> MediaStream {
            MediaStream::new(Arc::new(NullStream))
        }

        async fn close(&self) {}
    }

    fn name(s: &str) -> PeerName {
        PeerName::parse(s).unwrap()
    }

    fn channel(peer: &str) -> Arc<dyn ChannelHandle> {
        Arc::new(NullChannel(name(peer)))
    }

    fn call(peer: &str) -> Arc<dyn CallHandle> {
        Arc::new(NullCall(name(peer)))
    }

    #[test]
    fn test_record_created_on_first_slot() {
        let mut table = ConnectionTable::new();
        let bob = name("bob");

        assert!(!table.contains(&bob));
        table.set_data(&bob, channel("bob"));
        assert!(table.contains(&bob));
        assert!(table.data_channel(&bob).is_some());
        assert!(table.media_call(&bob).is_none());
    }

    #[test]
    fn test_clearing_last_slot_removes_record() {
        let mut table = ConnectionTable::new();
        let bob = name("bob");

        table.set_data(&bob, channel("bob"));
        assert!(table.clear_data(&bob).is_some());
        assert!(!table.contains(&bob));
        assert!(table.is_empty());
    }

    #[test]
    fn test_slots_are_independent() {
        let mut table = ConnectionTable::new();
        let bob = name("bob");

        table.set_data(&bob, channel("bob"));
        table.set_media(&bob, call("bob"));

        // dropping media keeps the data channel record
        assert!(table.clear_media(&bob).is_some());
        assert!(table.contains(&bob));
        assert!(table.data_channel(&bob).is_some());

        // and the other way round
        table.set_media(&bob, call("bob"));
        assert!(table.clear_data(&bob).is_some());
        assert!(table.media_call(&bob).is_some());
    }

    #[test]
    fn test_clear_absent_is_noop() {
        let mut table = ConnectionTable::new();
        assert!(table.clear_data(&name("ghost")).is_none());
        assert!(table.clear_media(&name("ghost")).is_none());
    }

    #[test]
    fn test_clear_media_twice_yields_once() {
        let mut table = ConnectionTable::new();
        let dave = name("dave");

        table.set_media(&dave, call("dave"));
        assert!(table.clear_media(&dave).is_some());
        assert!(table.clear_media(&dave).is_none());
    }

    #[test]
    fn test_drain_all() {
        let mut table = ConnectionTable::new();
        table.set_data(&name("bob"), channel("bob"));
        table.set_media(&name("carol"), call("carol"));

        let drained = table.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn test_peers_lists_only_live_records() {
        let mut table = ConnectionTable::new();
        table.set_data(&name("bob"), channel("bob"));
        table.set_data(&name("carol"), channel("carol"));
        table.clear_data(&name("bob"));

        assert_eq!(table.peers(), vec![name("carol")]);
    }
}

//! In-process implementations of the store traits.
//!
//! These back the integration tests and local demos; a deployment swaps in
//! an adapter over its real document store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};

use crate::{
    PeerId, PresenceError, PresenceRecord, PresenceStore, SignalChannel, SignalError,
    SignalMessage,
};

const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

/// Presence store held in a process-local map.
pub struct MemoryPresenceStore {
    records: RwLock<HashMap<PeerId, PresenceRecord>>,
    snapshots: broadcast::Sender<Vec<PresenceRecord>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            snapshots,
        }
    }

    /// Current contents, without any staleness filtering.
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        self.records.read().values().cloned().collect()
    }

    fn publish_snapshot(&self) {
        // No subscribers yet is fine; the next change publishes again.
        let _ = self.snapshots.send(self.snapshot());
    }
}

impl Default for MemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn upsert(&self, record: PresenceRecord) -> Result<(), PresenceError> {
        self.records.write().insert(record.id.clone(), record);
        self.publish_snapshot();
        Ok(())
    }

    async fn delete(&self, peer_id: &PeerId) -> Result<(), PresenceError> {
        self.records.write().remove(peer_id);
        self.publish_snapshot();
        Ok(())
    }

    fn subscribe_all(&self) -> broadcast::Receiver<Vec<PresenceRecord>> {
        self.snapshots.subscribe()
    }
}

/// Append-only signal log with per-recipient routing.
///
/// Routing uses one unbounded channel per subscriber, so delivery order for
/// a given sender/recipient pair matches append order.
pub struct MemorySignalBus {
    subscribers: RwLock<HashMap<PeerId, Vec<mpsc::UnboundedSender<SignalMessage>>>>,
    history: RwLock<Vec<SignalMessage>>,
}

impl MemorySignalBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Every message ever appended, in append order.
    pub fn history(&self) -> Vec<SignalMessage> {
        self.history.read().clone()
    }
}

impl Default for MemorySignalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalChannel for MemorySignalBus {
    async fn append(&self, message: SignalMessage) -> Result<(), SignalError> {
        self.history.write().push(message.clone());
        let mut subscribers = self.subscribers.write();
        if let Some(senders) = subscribers.get_mut(message.to()) {
            senders.retain(|sender| sender.send(message.clone()).is_ok());
        }
        // A recipient that has not subscribed yet simply misses the message,
        // matching an append-only store read from subscription time onward.
        Ok(())
    }

    fn subscribe(&self, recipient: &PeerId) -> mpsc::UnboundedReceiver<SignalMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .entry(recipient.clone())
            .or_default()
            .push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CandidateBlob;

    fn candidate(from: &str, to: &str, n: u32) -> SignalMessage {
        SignalMessage::Candidate {
            from: PeerId::from(from),
            to: PeerId::from(to),
            candidate: CandidateBlob {
                candidate: format!("candidate:{n}"),
                sdp_mid: None,
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
        }
    }

    #[tokio::test]
    async fn routes_only_to_the_addressed_recipient() {
        let bus = MemorySignalBus::new();
        let mut rx_b = bus.subscribe(&PeerId::from("b2"));
        let mut rx_c = bus.subscribe(&PeerId::from("c3"));

        bus.append(candidate("a1", "b2", 1)).await.unwrap();

        let message = rx_b.recv().await.unwrap();
        assert_eq!(message.to().as_str(), "b2");
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn preserves_append_order_per_pair() {
        let bus = MemorySignalBus::new();
        let mut rx = bus.subscribe(&PeerId::from("b2"));

        for n in 1..=3 {
            bus.append(candidate("a1", "b2", n)).await.unwrap();
        }

        for expected in 1..=3 {
            match rx.recv().await.unwrap() {
                SignalMessage::Candidate { candidate, .. } => {
                    assert_eq!(candidate.candidate, format!("candidate:{expected}"));
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
        assert_eq!(bus.history().len(), 3);
    }

    #[tokio::test]
    async fn presence_snapshots_reflect_upsert_and_delete() {
        let store = MemoryPresenceStore::new();
        let mut snapshots = store.subscribe_all();

        store
            .upsert(PresenceRecord {
                id: PeerId::from("a1"),
                display_name: "Ada".into(),
                last_seen_at: 1,
                joined_at: 1,
            })
            .await
            .unwrap();
        assert_eq!(snapshots.recv().await.unwrap().len(), 1);

        store.delete(&PeerId::from("a1")).await.unwrap();
        assert!(snapshots.recv().await.unwrap().is_empty());
    }
}

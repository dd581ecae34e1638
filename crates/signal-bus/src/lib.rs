//! Store-facing data model and traits for mesh call signaling.
//!
//! Presence and connection negotiation both ride on a shared document
//! store. This crate defines what gets written there (`PresenceRecord`,
//! `SignalMessage`), the trait boundary the conferencing engine consumes
//! (`PresenceStore`, `SignalChannel`), and in-memory implementations used
//! by tests and single-process demos.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

pub mod memory;

pub use memory::{MemoryPresenceStore, MemorySignalBus};

/// Stable identity of one participant across reconnects.
///
/// Assigned once per device and persisted locally; the lexicographic order
/// of two ids decides which side initiates an offer, so `PeerId` is `Ord`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Liveness lease one participant upserts on a fixed heartbeat.
///
/// Last-write-wins per id. Staleness is a read-time computation; the store
/// never expires records on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub id: PeerId,
    pub display_name: String,
    /// Unix millis of the most recent heartbeat.
    pub last_seen_at: i64,
    /// Unix millis of the first heartbeat; stable for roster ordering.
    pub joined_at: i64,
}

/// ICE candidate payload as it travels through the signal channel.
///
/// Plain fields rather than a `webrtc` type so the store boundary stays
/// free of the WebRTC dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateBlob {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
    pub username_fragment: Option<String>,
}

/// One negotiation message between exactly two peers.
///
/// Written once, read by the addressed recipient. Delivery order within one
/// sender/recipient pair is preserved by the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalMessage {
    Offer {
        from: PeerId,
        to: PeerId,
        sdp: String,
    },
    Answer {
        from: PeerId,
        to: PeerId,
        sdp: String,
    },
    Candidate {
        from: PeerId,
        to: PeerId,
        candidate: CandidateBlob,
    },
}

impl SignalMessage {
    pub fn from(&self) -> &PeerId {
        match self {
            SignalMessage::Offer { from, .. }
            | SignalMessage::Answer { from, .. }
            | SignalMessage::Candidate { from, .. } => from,
        }
    }

    pub fn to(&self) -> &PeerId {
        match self {
            SignalMessage::Offer { to, .. }
            | SignalMessage::Answer { to, .. }
            | SignalMessage::Candidate { to, .. } => to,
        }
    }
}

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("presence write failed: {0}")]
    Write(String),
    #[error("presence store closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("signal write failed: {0}")]
    Write(String),
    #[error("signal channel closed")]
    Closed,
}

/// Shared presence document store.
///
/// `subscribe_all` delivers a full snapshot of the store on every change;
/// readers filter staleness themselves.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn upsert(&self, record: PresenceRecord) -> Result<(), PresenceError>;

    async fn delete(&self, peer_id: &PeerId) -> Result<(), PresenceError>;

    fn subscribe_all(&self) -> broadcast::Receiver<Vec<PresenceRecord>>;
}

/// Append-only record store for negotiation messages.
///
/// Unordered across pairs; FIFO within one sender/recipient pair.
#[async_trait]
pub trait SignalChannel: Send + Sync {
    async fn append(&self, message: SignalMessage) -> Result<(), SignalError>;

    /// Subscribe to every message addressed to `recipient`.
    fn subscribe(&self, recipient: &PeerId) -> mpsc::UnboundedReceiver<SignalMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_ids_order_lexicographically() {
        assert!(PeerId::from("alpha") < PeerId::from("beta"));
        assert!(PeerId::from("a1") < PeerId::from("b2"));
        assert_eq!(PeerId::from("a1"), PeerId::new("a1"));
    }

    #[test]
    fn signal_messages_are_internally_tagged() {
        let message = SignalMessage::Candidate {
            from: PeerId::from("a1"),
            to: PeerId::from("b2"),
            candidate: CandidateBlob {
                candidate: "candidate:1 1 UDP 2130706431 192.0.2.1 54321 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["kind"], "candidate");
        assert_eq!(value["from"], "a1");
        assert_eq!(value["to"], "b2");

        let back: SignalMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back.from().as_str(), "a1");
        assert_eq!(back.to().as_str(), "b2");
    }
}

//! Mesh peer-to-peer conferencing: presence-driven discovery, offer/answer
//! negotiation over a shared signal channel, and per-peer connection
//! lifecycle management.
//!
//! Every participant heartbeats a presence lease into a shared store and
//! derives the set of live peers from store snapshots. For each newly seen
//! peer, the side whose id sorts smaller sends the offer; the other side
//! answers. ICE candidates trickle through the same channel, queueing until
//! the remote description is in place. Media then flows directly peer to
//! peer; when a peer goes stale, disconnects, or leaves, its session is
//! torn down and its state discarded.
//!
//! STUN-only: there is no TURN fallback, so NAT topologies that require a
//! relay will not connect.

pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod media;
pub mod roster;

pub use config::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_STALE_THRESHOLD, MeshConfig};
pub use engine::{Conference, ConferenceView, RemoteStream};
pub use error::ConferenceError;
pub use identity::{DeviceIdentity, should_initiate};
pub use media::{LocalTracks, MediaError, MediaGateway, SampleMedia};
pub use roster::compute_roster;

pub use signal_bus;
pub use signal_bus::{PeerId, PresenceRecord, PresenceStore, SignalChannel, SignalMessage};

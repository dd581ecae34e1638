use signal_bus::{PeerId, PresenceError, SignalError};
use thiserror::Error;

use crate::media::MediaError;

/// Failure taxonomy for the conferencing engine.
///
/// Per-peer failures (negotiation, connectivity) are contained to that
/// peer's session and surface here only when the caller asked for that peer
/// directly; they never abort other sessions.
#[derive(Debug, Error)]
pub enum ConferenceError {
    #[error("media acquisition failed: {0}")]
    Media(#[from] MediaError),
    #[error("signal channel failure: {0}")]
    Signal(#[from] SignalError),
    #[error("presence store failure: {0}")]
    Presence(#[from] PresenceError),
    #[error("negotiation with {peer_id} failed: {message}")]
    Negotiation { peer_id: PeerId, message: String },
    #[error("webrtc setup failed: {0}")]
    Setup(#[from] webrtc::Error),
    #[error("identity storage failed: {0}")]
    Identity(#[from] std::io::Error),
}

impl ConferenceError {
    pub(crate) fn negotiation(peer_id: &PeerId, err: impl std::fmt::Display) -> Self {
        Self::Negotiation {
            peer_id: peer_id.clone(),
            message: err.to_string(),
        }
    }
}

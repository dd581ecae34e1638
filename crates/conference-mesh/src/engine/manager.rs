//! Session ownership and lifecycle transitions.
//!
//! All live sessions sit in one map keyed by peer id, owned here. Other
//! components refer to a session only by key, so closing a session out from
//! under an in-flight callback can never dangle a reference.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use signal_bus::{CandidateBlob, PeerId};
use tracing::{debug, info, warn};

use crate::engine::candidates::PendingCandidates;
use crate::engine::session::{PeerSession, SessionContext, init_from_blob};
use crate::error::ConferenceError;

#[derive(Default)]
pub(crate) struct ConnectionManager {
    sessions: HashMap<PeerId, PeerSession>,
    pending: PendingCandidates,
    next_epoch: u64,
}

impl ConnectionManager {
    pub(crate) fn contains(&self, peer_id: &PeerId) -> bool {
        self.sessions.contains_key(peer_id)
    }

    pub(crate) fn session(&self, peer_id: &PeerId) -> Option<&PeerSession> {
        self.sessions.get(peer_id)
    }

    pub(crate) fn session_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerSession> {
        self.sessions.get_mut(peer_id)
    }

    pub(crate) fn peers(&self) -> Vec<PeerId> {
        self.sessions.keys().cloned().collect()
    }

    pub(crate) fn sessions(&self) -> impl Iterator<Item = &PeerSession> {
        self.sessions.values()
    }

    /// Get or create the session for `peer_id`. Idempotent: a second call
    /// while one already exists returns the existing session untouched,
    /// which is what makes interleaved discovery callbacks safe.
    pub(crate) async fn ensure_session(
        &mut self,
        ctx: &SessionContext,
        peer_id: &PeerId,
    ) -> Result<&mut PeerSession, ConferenceError> {
        match self.sessions.entry(peer_id.clone()) {
            Entry::Occupied(existing) => Ok(existing.into_mut()),
            Entry::Vacant(vacant) => {
                let epoch = self.next_epoch;
                self.next_epoch += 1;
                let session = PeerSession::connect(ctx, peer_id.clone(), epoch).await?;
                info!(peer = %peer_id, epoch, "session created");
                Ok(vacant.insert(session))
            }
        }
    }

    /// Tear down `peer_id` completely: close the native connection, drop
    /// the session, and drop any queued candidates. Returns whether a
    /// session existed.
    pub(crate) async fn close(&mut self, peer_id: &PeerId) -> bool {
        let Some(session) = self.sessions.remove(peer_id) else {
            return false;
        };
        self.pending.discard(peer_id);
        if let Err(err) = session.pc.close().await {
            warn!(peer = %peer_id, error = %err, "peer connection close failed");
        }
        info!(peer = %peer_id, epoch = session.epoch, "session closed");
        true
    }

    pub(crate) async fn close_all(&mut self) {
        for peer_id in self.peers() {
            self.close(&peer_id).await;
        }
    }

    /// Apply a remote candidate now if the session is past its remote
    /// description, otherwise queue it for the flush.
    pub(crate) async fn add_or_queue_candidate(&mut self, peer_id: &PeerId, blob: CandidateBlob) {
        match self.sessions.get(peer_id) {
            Some(session) if session.has_remote_description => {
                if let Err(err) = session.pc.add_ice_candidate(init_from_blob(blob)).await {
                    warn!(peer = %peer_id, error = %err, "remote candidate rejected");
                }
            }
            _ => {
                debug!(peer = %peer_id, "remote description not ready, queueing candidate");
                self.pending.push(peer_id, blob);
            }
        }
    }

    /// Apply everything queued for `peer_id`, in arrival order. Called
    /// exactly once per session, immediately after its remote description
    /// is set.
    pub(crate) async fn flush_candidates(&mut self, peer_id: &PeerId) {
        let queued = self.pending.drain(peer_id);
        if queued.is_empty() {
            return;
        }
        let Some(session) = self.sessions.get(peer_id) else {
            debug!(peer = %peer_id, "dropping queued candidates for closed session");
            return;
        };
        debug!(peer = %peer_id, count = queued.len(), "flushing queued candidates");
        for blob in queued {
            if let Err(err) = session.pc.add_ice_candidate(init_from_blob(blob)).await {
                warn!(peer = %peer_id, error = %err, "queued candidate rejected");
            }
        }
    }

    /// Drop pending-candidate queues for peers that are neither fresh nor
    /// connected anymore.
    pub(crate) fn prune_pending<F>(&mut self, mut is_fresh: F)
    where
        F: FnMut(&PeerId) -> bool,
    {
        let sessions = &self.sessions;
        self.pending
            .retain(|peer_id| sessions.contains_key(peer_id) || is_fresh(peer_id));
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self, peer_id: &PeerId) -> usize {
        self.pending.len(peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshConfig;
    use crate::engine::build_api;
    use crate::media::LocalTracks;
    use tokio::sync::mpsc;

    fn test_context() -> SessionContext {
        let config = MeshConfig::new("tester").with_stun_servers(Vec::new());
        let api = build_api(&config).expect("api");
        let (events, _rx) = mpsc::unbounded_channel();
        SessionContext {
            api,
            config,
            local_tracks: LocalTracks::default(),
            events,
        }
    }

    #[tokio::test]
    async fn ensure_session_is_idempotent() {
        let ctx = test_context();
        let mut manager = ConnectionManager::default();
        let peer = PeerId::from("b2");

        let first_epoch = manager.ensure_session(&ctx, &peer).await.unwrap().epoch;
        let second_epoch = manager.ensure_session(&ctx, &peer).await.unwrap().epoch;
        assert_eq!(first_epoch, second_epoch);
        assert_eq!(manager.peers().len(), 1);
    }

    #[tokio::test]
    async fn close_allows_a_fresh_session_with_a_new_epoch() {
        let ctx = test_context();
        let mut manager = ConnectionManager::default();
        let peer = PeerId::from("b2");

        let first_epoch = manager.ensure_session(&ctx, &peer).await.unwrap().epoch;
        assert!(manager.close(&peer).await);
        assert!(!manager.contains(&peer));

        let second_epoch = manager.ensure_session(&ctx, &peer).await.unwrap().epoch;
        assert_ne!(first_epoch, second_epoch);
    }

    #[tokio::test]
    async fn candidates_queue_until_remote_description() {
        let ctx = test_context();
        let mut manager = ConnectionManager::default();
        let peer = PeerId::from("b2");
        manager.ensure_session(&ctx, &peer).await.unwrap();

        let blob = CandidateBlob {
            candidate: "candidate:1 1 UDP 2130706431 127.0.0.1 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        manager.add_or_queue_candidate(&peer, blob).await;
        assert_eq!(manager.pending_len(&peer), 1);

        // Closing discards the queue along with the session.
        manager.close(&peer).await;
        assert_eq!(manager.pending_len(&peer), 0);
    }
}

//! Pending ICE candidate queues.
//!
//! Candidates are generated eagerly and routinely outrun the offer/answer
//! round trip. Anything that arrives before a peer's remote description is
//! set waits here, keyed by peer, and is applied in arrival order when the
//! session reaches that point.

use std::collections::HashMap;

use signal_bus::{CandidateBlob, PeerId};

#[derive(Default)]
pub(crate) struct PendingCandidates {
    queues: HashMap<PeerId, Vec<CandidateBlob>>,
}

impl PendingCandidates {
    pub(crate) fn push(&mut self, peer_id: &PeerId, candidate: CandidateBlob) {
        self.queues
            .entry(peer_id.clone())
            .or_default()
            .push(candidate);
    }

    /// Take everything queued for `peer_id`, in arrival order, leaving the
    /// queue empty. Flushing a peer is a one-shot operation.
    pub(crate) fn drain(&mut self, peer_id: &PeerId) -> Vec<CandidateBlob> {
        self.queues.remove(peer_id).unwrap_or_default()
    }

    pub(crate) fn discard(&mut self, peer_id: &PeerId) {
        self.queues.remove(peer_id);
    }

    /// Drop queues whose peer no longer exists anywhere (no session, not in
    /// the fresh roster), so ghosts cannot accumulate state.
    pub(crate) fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&PeerId) -> bool,
    {
        self.queues.retain(|peer_id, _| keep(peer_id));
    }

    #[cfg(test)]
    pub(crate) fn len(&self, peer_id: &PeerId) -> usize {
        self.queues.get(peer_id).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(n: u32) -> CandidateBlob {
        CandidateBlob {
            candidate: format!("candidate:{n}"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn drains_in_arrival_order_and_empties_the_queue() {
        let mut pending = PendingCandidates::default();
        let peer = PeerId::from("b2");
        for n in 1..=3 {
            pending.push(&peer, blob(n));
        }

        let drained = pending.drain(&peer);
        let order: Vec<String> = drained.into_iter().map(|c| c.candidate).collect();
        assert_eq!(order, vec!["candidate:1", "candidate:2", "candidate:3"]);
        assert_eq!(pending.len(&peer), 0);
        assert!(pending.drain(&peer).is_empty());
    }

    #[test]
    fn queues_are_independent_per_peer() {
        let mut pending = PendingCandidates::default();
        pending.push(&PeerId::from("b2"), blob(1));
        pending.push(&PeerId::from("c3"), blob(2));

        pending.discard(&PeerId::from("b2"));
        assert_eq!(pending.len(&PeerId::from("b2")), 0);
        assert_eq!(pending.len(&PeerId::from("c3")), 1);
    }

    #[test]
    fn retain_prunes_unknown_peers() {
        let mut pending = PendingCandidates::default();
        pending.push(&PeerId::from("known"), blob(1));
        pending.push(&PeerId::from("ghost"), blob(2));

        pending.retain(|peer_id| peer_id.as_str() == "known");
        assert_eq!(pending.len(&PeerId::from("known")), 1);
        assert_eq!(pending.len(&PeerId::from("ghost")), 0);
    }
}

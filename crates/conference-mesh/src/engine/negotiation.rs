//! Offer/answer negotiation between one peer pair.
//!
//! Exactly one side of a pair initiates: the one whose id sorts smaller
//! (see [`crate::identity::should_initiate`]). The other side answers. Both
//! sides trickle candidates through the signal channel; anything arriving
//! early waits in the pending queue and is flushed the moment the remote
//! description lands.

use std::sync::Arc;

use signal_bus::{PeerId, SignalChannel, SignalMessage};
use tracing::{debug, info};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::engine::manager::ConnectionManager;
use crate::engine::session::SessionContext;
use crate::error::ConferenceError;

pub(crate) struct Negotiator {
    pub(crate) self_id: PeerId,
    pub(crate) signals: Arc<dyn SignalChannel>,
}

impl Negotiator {
    /// Initiator role: create (or reuse) the session, publish an offer, and
    /// wait for the answer to arrive through the signal channel.
    pub(crate) async fn initiate(
        &self,
        manager: &mut ConnectionManager,
        ctx: &SessionContext,
        peer_id: &PeerId,
    ) -> Result<(), ConferenceError> {
        let session = manager.ensure_session(ctx, peer_id).await?;
        let offer = session
            .pc
            .create_offer(None)
            .await
            .map_err(|err| ConferenceError::negotiation(peer_id, err))?;
        let sdp = offer.sdp.clone();
        session
            .pc
            .set_local_description(offer)
            .await
            .map_err(|err| ConferenceError::negotiation(peer_id, err))?;
        self.signals
            .append(SignalMessage::Offer {
                from: self.self_id.clone(),
                to: peer_id.clone(),
                sdp,
            })
            .await?;
        info!(peer = %peer_id, "offer published");
        Ok(())
    }

    /// Responder role: an inbound offer for a peer without a session
    /// creates one, applies the offer, flushes queued candidates, and
    /// publishes the answer.
    pub(crate) async fn respond_to_offer(
        &self,
        manager: &mut ConnectionManager,
        ctx: &SessionContext,
        peer_id: &PeerId,
        sdp: String,
    ) -> Result<(), ConferenceError> {
        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|err| ConferenceError::negotiation(peer_id, err))?;
        {
            let session = manager.ensure_session(ctx, peer_id).await?;
            session
                .pc
                .set_remote_description(offer)
                .await
                .map_err(|err| ConferenceError::negotiation(peer_id, err))?;
            session.has_remote_description = true;
        }
        manager.flush_candidates(peer_id).await;

        let Some(session) = manager.session(peer_id) else {
            // Closed while we were applying the offer; nothing to answer.
            return Ok(());
        };
        let pc = session.pc.clone();
        let answer = pc
            .create_answer(None)
            .await
            .map_err(|err| ConferenceError::negotiation(peer_id, err))?;
        let sdp = answer.sdp.clone();
        pc.set_local_description(answer)
            .await
            .map_err(|err| ConferenceError::negotiation(peer_id, err))?;
        self.signals
            .append(SignalMessage::Answer {
                from: self.self_id.clone(),
                to: peer_id.clone(),
                sdp,
            })
            .await?;
        info!(peer = %peer_id, "answer published");
        Ok(())
    }

    /// Initiator's second half: apply the first matching answer, then flush
    /// queued candidates. Later answers for the same session are dropped.
    pub(crate) async fn apply_answer(
        &self,
        manager: &mut ConnectionManager,
        peer_id: &PeerId,
        sdp: String,
    ) -> Result<(), ConferenceError> {
        let Some(session) = manager.session_mut(peer_id) else {
            debug!(peer = %peer_id, "answer for unknown session ignored");
            return Ok(());
        };
        if session.has_remote_description {
            debug!(peer = %peer_id, "duplicate answer ignored");
            return Ok(());
        }
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|err| ConferenceError::negotiation(peer_id, err))?;
        session
            .pc
            .set_remote_description(answer)
            .await
            .map_err(|err| ConferenceError::negotiation(peer_id, err))?;
        session.has_remote_description = true;
        manager.flush_candidates(peer_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeshConfig;
    use crate::engine::build_api;
    use crate::media::{MediaGateway, SampleMedia};
    use signal_bus::MemorySignalBus;
    use tokio::sync::mpsc;

    async fn test_side(
        id: &str,
        bus: Arc<MemorySignalBus>,
    ) -> (Negotiator, ConnectionManager, SessionContext) {
        let config = MeshConfig::new(id).with_stun_servers(Vec::new());
        let api = build_api(&config).expect("api");
        let local_tracks = SampleMedia::new().acquire().await.expect("tracks");
        let (events, _rx) = mpsc::unbounded_channel();
        let negotiator = Negotiator {
            self_id: PeerId::from(id),
            signals: bus,
        };
        let ctx = SessionContext {
            api,
            config,
            local_tracks,
            events,
        };
        (negotiator, ConnectionManager::default(), ctx)
    }

    // Full offer/answer round trip through the bus, no network needed.
    #[tokio::test]
    async fn offer_answer_round_trip_sets_remote_descriptions() {
        let bus = Arc::new(MemorySignalBus::new());
        let (negotiator_a, mut manager_a, ctx_a) = test_side("a1", bus.clone()).await;
        let (negotiator_b, mut manager_b, ctx_b) = test_side("b2", bus.clone()).await;
        let mut inbox_a = bus.subscribe(&PeerId::from("a1"));
        let mut inbox_b = bus.subscribe(&PeerId::from("b2"));

        negotiator_a
            .initiate(&mut manager_a, &ctx_a, &PeerId::from("b2"))
            .await
            .unwrap();

        let Some(SignalMessage::Offer { from, sdp, .. }) = inbox_b.recv().await else {
            panic!("expected an offer for b2");
        };
        assert_eq!(from.as_str(), "a1");

        negotiator_b
            .respond_to_offer(&mut manager_b, &ctx_b, &from, sdp)
            .await
            .unwrap();
        assert!(
            manager_b
                .session(&PeerId::from("a1"))
                .unwrap()
                .has_remote_description
        );

        let Some(SignalMessage::Answer { from, sdp, .. }) = inbox_a.recv().await else {
            panic!("expected an answer for a1");
        };
        negotiator_a
            .apply_answer(&mut manager_a, &from, sdp)
            .await
            .unwrap();
        assert!(
            manager_a
                .session(&PeerId::from("b2"))
                .unwrap()
                .has_remote_description
        );
    }

    #[tokio::test]
    async fn answer_for_unknown_session_is_ignored() {
        let bus = Arc::new(MemorySignalBus::new());
        let (negotiator, mut manager, _ctx) = test_side("a1", bus).await;

        negotiator
            .apply_answer(&mut manager, &PeerId::from("b2"), "v=0".into())
            .await
            .unwrap();
        assert!(!manager.contains(&PeerId::from("b2")));
    }
}

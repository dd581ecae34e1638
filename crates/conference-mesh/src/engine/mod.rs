//! The conferencing engine.
//!
//! One task owns every piece of mutable call state: the session map, the
//! pending candidate queues, and the published view. Store snapshots,
//! inbound signals, ICE events, and user commands all arrive as messages on
//! that task's channels, so transitions never race and no locking is
//! needed. Negotiation awaits run inline on the engine task, which means a
//! session cannot be closed underneath an in-flight negotiation step.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use signal_bus::{PeerId, PresenceRecord, PresenceStore, SignalChannel, SignalMessage};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::track::track_remote::TrackRemote;

use crate::config::MeshConfig;
use crate::error::ConferenceError;
use crate::identity::{DeviceIdentity, should_initiate};
use crate::media::MediaGateway;
use crate::roster::{compute_roster, now_millis, spawn_heartbeat};

mod candidates;
mod manager;
mod negotiation;
mod session;

use manager::ConnectionManager;
use negotiation::Negotiator;
use session::SessionContext;

/// Remote media exposed to the UI layer for one connected peer.
#[derive(Clone)]
pub struct RemoteStream {
    pub peer_id: PeerId,
    pub tracks: Vec<Arc<TrackRemote>>,
}

/// Reactive call state consumed by the surrounding UI: re-published on
/// every roster or connectivity change.
#[derive(Clone, Default)]
pub struct ConferenceView {
    /// Fresh peers, join order.
    pub roster: Vec<PresenceRecord>,
    /// Peers whose connection reached a connected/completed ICE state.
    pub connected: BTreeSet<PeerId>,
    /// Remote media per connected peer, absent until tracks arrive.
    pub remote_streams: HashMap<PeerId, RemoteStream>,
}

pub(crate) enum EngineEvent {
    LocalCandidate {
        peer_id: PeerId,
        epoch: u64,
        candidate: signal_bus::CandidateBlob,
    },
    IceState {
        peer_id: PeerId,
        epoch: u64,
        state: RTCIceConnectionState,
    },
    RemoteTrack {
        peer_id: PeerId,
        epoch: u64,
        track: Arc<TrackRemote>,
    },
    SetAudio(bool),
    SetVideo(bool),
    Leave(oneshot::Sender<()>),
}

pub(crate) fn build_api(config: &MeshConfig) -> Result<API, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
    let mut setting_engine = SettingEngine::default();
    if config.include_loopback_candidates {
        setting_engine.set_include_loopback_candidate(true);
    }
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}

/// Handle to one joined participant.
///
/// Joining acquires local media first; peer discovery reactions only start
/// once media is available. Dropping the handle triggers the same graceful
/// teardown as [`Conference::leave`], minus the acknowledgment.
pub struct Conference {
    self_id: PeerId,
    events: mpsc::UnboundedSender<EngineEvent>,
    view: watch::Receiver<ConferenceView>,
    heartbeat: JoinHandle<()>,
    _engine: JoinHandle<()>,
}

impl Conference {
    pub async fn join(
        config: MeshConfig,
        identity: DeviceIdentity,
        presence: Arc<dyn PresenceStore>,
        signals: Arc<dyn SignalChannel>,
        media: Arc<dyn MediaGateway>,
    ) -> Result<Self, ConferenceError> {
        let local_tracks = media.acquire().await?;
        let api = build_api(&config)?;
        let self_id = identity.peer_id;

        // Subscribe before the first heartbeat so no early offer or
        // snapshot is missed.
        let presence_rx = presence.subscribe_all();
        let signal_rx = signals.subscribe(&self_id);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ConferenceView::default());

        let heartbeat = spawn_heartbeat(
            presence.clone(),
            self_id.clone(),
            config.display_name.clone(),
            config.heartbeat_interval,
        );

        let engine = Engine {
            ctx: SessionContext {
                api,
                config,
                local_tracks,
                events: events_tx.clone(),
            },
            negotiator: Negotiator {
                self_id: self_id.clone(),
                signals,
            },
            manager: ConnectionManager::default(),
            presence,
            media,
            roster: Vec::new(),
            view_tx,
        };
        let engine = tokio::spawn(engine.run(events_rx, presence_rx, signal_rx));

        info!(peer_id = %self_id, "joined call mesh");
        Ok(Self {
            self_id,
            events: events_tx,
            view: view_rx,
            heartbeat,
            _engine: engine,
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.self_id
    }

    /// Watch the reactive view; resolves on every roster/stream change.
    pub fn view(&self) -> watch::Receiver<ConferenceView> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> ConferenceView {
        self.view.borrow().clone()
    }

    pub fn roster(&self) -> Vec<PresenceRecord> {
        self.view.borrow().roster.clone()
    }

    pub fn remote_streams(&self) -> HashMap<PeerId, RemoteStream> {
        self.view.borrow().remote_streams.clone()
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        let _ = self.events.send(EngineEvent::SetAudio(enabled));
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        let _ = self.events.send(EngineEvent::SetVideo(enabled));
    }

    /// Graceful teardown: close every session, delete our presence record
    /// so peers converge faster than the staleness timeout, and release the
    /// media gateway. Completes once the engine has finished cleaning up.
    pub async fn leave(&self) {
        self.heartbeat.abort();
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.events.send(EngineEvent::Leave(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

impl Drop for Conference {
    fn drop(&mut self) {
        self.heartbeat.abort();
        let (ack_tx, _) = oneshot::channel();
        let _ = self.events.send(EngineEvent::Leave(ack_tx));
    }
}

struct Engine {
    ctx: SessionContext,
    negotiator: Negotiator,
    manager: ConnectionManager,
    presence: Arc<dyn PresenceStore>,
    media: Arc<dyn MediaGateway>,
    roster: Vec<PresenceRecord>,
    view_tx: watch::Sender<ConferenceView>,
}

impl Engine {
    async fn run(
        mut self,
        mut events_rx: mpsc::UnboundedReceiver<EngineEvent>,
        mut presence_rx: broadcast::Receiver<Vec<PresenceRecord>>,
        mut signal_rx: mpsc::UnboundedReceiver<SignalMessage>,
    ) {
        let mut presence_open = true;
        let mut signals_open = true;
        loop {
            tokio::select! {
                // Presence first: a queued snapshot predating a signal must
                // be applied before that signal, or a session created by an
                // early offer could be closed by an older roster.
                biased;
                snapshot = presence_rx.recv(), if presence_open => match snapshot {
                    Ok(records) => self.on_presence(records).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "presence snapshots lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => presence_open = false,
                },
                message = signal_rx.recv(), if signals_open => match message {
                    Some(message) => self.on_signal(message).await,
                    None => signals_open = false,
                },
                event = events_rx.recv() => match event {
                    Some(EngineEvent::Leave(ack)) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(event) => self.on_event(event).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }
    }

    /// A fresh store snapshot arrived: recompute the roster, close sessions
    /// for vanished peers, and initiate toward newly seen ones where the
    /// tie-break makes us the caller.
    async fn on_presence(&mut self, records: Vec<PresenceRecord>) {
        self.roster = compute_roster(
            &records,
            &self.negotiator.self_id,
            now_millis(),
            self.ctx.config.stale_threshold,
        );
        let fresh: HashSet<PeerId> = self.roster.iter().map(|record| record.id.clone()).collect();

        for peer_id in self.manager.peers() {
            if !fresh.contains(&peer_id) {
                info!(peer = %peer_id, "peer left the fresh roster, closing session");
                self.manager.close(&peer_id).await;
            }
        }
        self.manager.prune_pending(|peer_id| fresh.contains(peer_id));

        let roster = self.roster.clone();
        for record in roster {
            if self.manager.contains(&record.id) {
                continue;
            }
            if !should_initiate(&self.negotiator.self_id, &record.id) {
                // Their id sorts smaller; they call, we answer.
                continue;
            }
            if let Err(err) = self
                .negotiator
                .initiate(&mut self.manager, &self.ctx, &record.id)
                .await
            {
                // Contained to this peer; it is re-attempted if it shows up
                // fresh in a later snapshot.
                warn!(peer = %record.id, error = %err, "negotiation failed");
                self.manager.close(&record.id).await;
            }
        }
        self.publish_view();
    }

    async fn on_signal(&mut self, message: SignalMessage) {
        if message.to() != &self.negotiator.self_id {
            return;
        }
        match message {
            SignalMessage::Offer { from, sdp, .. } => {
                if self.manager.contains(&from) {
                    // Replay or glare; answering twice is worse than
                    // ignoring, and the roster pass will self-heal.
                    debug!(peer = %from, "duplicate offer ignored");
                    return;
                }
                if let Err(err) = self
                    .negotiator
                    .respond_to_offer(&mut self.manager, &self.ctx, &from, sdp)
                    .await
                {
                    warn!(peer = %from, error = %err, "answering offer failed");
                    self.manager.close(&from).await;
                    self.publish_view();
                }
            }
            SignalMessage::Answer { from, sdp, .. } => {
                if let Err(err) = self
                    .negotiator
                    .apply_answer(&mut self.manager, &from, sdp)
                    .await
                {
                    warn!(peer = %from, error = %err, "applying answer failed");
                    self.manager.close(&from).await;
                    self.publish_view();
                }
            }
            SignalMessage::Candidate {
                from, candidate, ..
            } => {
                self.manager.add_or_queue_candidate(&from, candidate).await;
            }
        }
    }

    async fn on_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::LocalCandidate {
                peer_id,
                epoch,
                candidate,
            } => {
                let live = self
                    .manager
                    .session(&peer_id)
                    .is_some_and(|session| session.epoch == epoch);
                if !live {
                    return;
                }
                let message = SignalMessage::Candidate {
                    from: self.negotiator.self_id.clone(),
                    to: peer_id.clone(),
                    candidate,
                };
                if let Err(err) = self.negotiator.signals.append(message).await {
                    // Transient write failure; the pair may still connect on
                    // the candidates that did get through.
                    warn!(peer = %peer_id, error = %err, "candidate publish failed");
                }
            }
            EngineEvent::IceState {
                peer_id,
                epoch,
                state,
            } => self.on_ice_state(peer_id, epoch, state).await,
            EngineEvent::RemoteTrack {
                peer_id,
                epoch,
                track,
            } => {
                if let Some(session) = self.manager.session_mut(&peer_id) {
                    if session.epoch == epoch {
                        debug!(peer = %peer_id, "remote track arrived");
                        session.remote_tracks.push(track);
                        if session.connected {
                            self.publish_view();
                        }
                    }
                }
            }
            EngineEvent::SetAudio(enabled) => self.media.set_audio_enabled(enabled),
            EngineEvent::SetVideo(enabled) => self.media.set_video_enabled(enabled),
            EngineEvent::Leave(_) => {}
        }
    }

    async fn on_ice_state(&mut self, peer_id: PeerId, epoch: u64, state: RTCIceConnectionState) {
        match state {
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                if let Some(session) = self.manager.session_mut(&peer_id) {
                    if session.epoch == epoch && !session.connected {
                        session.connected = true;
                        info!(peer = %peer_id, "peer connected");
                        self.publish_view();
                    }
                }
            }
            RTCIceConnectionState::Failed
            | RTCIceConnectionState::Disconnected
            | RTCIceConnectionState::Closed => {
                let live = self
                    .manager
                    .session(&peer_id)
                    .is_some_and(|session| session.epoch == epoch);
                if live {
                    info!(peer = %peer_id, ?state, "connectivity lost, closing session");
                    self.manager.close(&peer_id).await;
                    self.publish_view();
                }
            }
            _ => {}
        }
    }

    fn publish_view(&self) {
        let mut connected = BTreeSet::new();
        let mut remote_streams = HashMap::new();
        for session in self.manager.sessions() {
            if !session.connected {
                continue;
            }
            connected.insert(session.peer_id.clone());
            if !session.remote_tracks.is_empty() {
                remote_streams.insert(
                    session.peer_id.clone(),
                    RemoteStream {
                        peer_id: session.peer_id.clone(),
                        tracks: session.remote_tracks.clone(),
                    },
                );
            }
        }
        self.view_tx.send_replace(ConferenceView {
            roster: self.roster.clone(),
            connected,
            remote_streams,
        });
    }

    async fn shutdown(&mut self) {
        self.manager.close_all().await;
        self.roster.clear();
        self.publish_view();
        // Best effort: peers fall back to staleness if this write is lost.
        if let Err(err) = self.presence.delete(&self.negotiator.self_id).await {
            warn!(error = %err, "presence delete failed, peers will rely on staleness");
        }
        self.media.release();
        info!(peer_id = %self.negotiator.self_id, "left call mesh");
    }
}

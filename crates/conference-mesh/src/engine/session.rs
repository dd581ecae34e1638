//! Per-peer connection sessions.
//!
//! A session wraps one native peer connection. Its callbacks never touch
//! engine state directly; they forward events into the engine loop, tagged
//! with the session epoch so a late callback from a torn-down connection
//! cannot disturb a successor session for the same peer.

use std::sync::Arc;

use signal_bus::{CandidateBlob, PeerId};
use tokio::sync::mpsc;
use tracing::warn;
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::config::MeshConfig;
use crate::engine::EngineEvent;
use crate::error::ConferenceError;
use crate::media::LocalTracks;

/// Everything a session needs from the engine to wire itself up.
pub(crate) struct SessionContext {
    pub(crate) api: API,
    pub(crate) config: MeshConfig,
    pub(crate) local_tracks: LocalTracks,
    pub(crate) events: mpsc::UnboundedSender<EngineEvent>,
}

pub(crate) struct PeerSession {
    pub(crate) peer_id: PeerId,
    /// Monotonic per-engine counter; callbacks carry it so events from a
    /// closed session generation are dropped.
    pub(crate) epoch: u64,
    pub(crate) pc: Arc<RTCPeerConnection>,
    pub(crate) has_remote_description: bool,
    pub(crate) connected: bool,
    pub(crate) remote_tracks: Vec<Arc<TrackRemote>>,
}

impl PeerSession {
    /// Build the native connection for `peer_id`: attach every local track,
    /// forward local candidates, connectivity changes, and remote tracks
    /// into the engine loop.
    pub(crate) async fn connect(
        ctx: &SessionContext,
        peer_id: PeerId,
        epoch: u64,
    ) -> Result<Self, ConferenceError> {
        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(&ctx.config),
            ice_candidate_pool_size: ctx.config.ice_candidate_pool_size,
            ..Default::default()
        };
        let pc = Arc::new(ctx.api.new_peer_connection(rtc_config).await?);

        for track in ctx.local_tracks.iter() {
            let sender = pc.add_track(track).await?;
            // Drain RTCP so the interceptors keep running.
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }

        let events = ctx.events.clone();
        let candidate_peer = peer_id.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            let peer_id = candidate_peer.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(EngineEvent::LocalCandidate {
                            peer_id,
                            epoch,
                            candidate: blob_from_init(init),
                        });
                    }
                    Err(err) => {
                        warn!(peer = %peer_id, error = %err, "local candidate not serializable");
                    }
                }
            })
        }));

        let events = ctx.events.clone();
        let state_peer = peer_id.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let events = events.clone();
            let peer_id = state_peer.clone();
            Box::pin(async move {
                let _ = events.send(EngineEvent::IceState {
                    peer_id,
                    epoch,
                    state,
                });
            })
        }));

        let events = ctx.events.clone();
        let track_peer = peer_id.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = events.clone();
                let peer_id = track_peer.clone();
                Box::pin(async move {
                    let _ = events.send(EngineEvent::RemoteTrack {
                        peer_id,
                        epoch,
                        track,
                    });
                })
            },
        ));

        Ok(Self {
            peer_id,
            epoch,
            pc,
            has_remote_description: false,
            connected: false,
            remote_tracks: Vec::new(),
        })
    }
}

fn ice_servers(config: &MeshConfig) -> Vec<RTCIceServer> {
    if config.stun_servers.is_empty() {
        return Vec::new();
    }
    vec![RTCIceServer {
        urls: config.stun_servers.clone(),
        ..Default::default()
    }]
}

pub(crate) fn blob_from_init(init: RTCIceCandidateInit) -> CandidateBlob {
    CandidateBlob {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

pub(crate) fn init_from_blob(blob: CandidateBlob) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: blob.candidate,
        sdp_mid: blob.sdp_mid,
        sdp_mline_index: blob.sdp_mline_index,
        username_fragment: blob.username_fragment,
    }
}

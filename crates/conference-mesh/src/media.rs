//! Local capture boundary.
//!
//! The engine never talks to a device directly; it acquires a set of local
//! tracks from a [`MediaGateway`] once at join time, attaches them to every
//! peer connection, and releases the gateway on teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("capture device access denied: {0}")]
    Denied(String),
}

/// Local tracks shared read-only across every open peer connection; the
/// per-connection fan-out happens inside the native connection objects.
#[derive(Clone, Default)]
pub struct LocalTracks {
    pub audio: Option<Arc<dyn TrackLocal + Send + Sync>>,
    pub video: Option<Arc<dyn TrackLocal + Send + Sync>>,
}

impl LocalTracks {
    pub fn iter(&self) -> impl Iterator<Item = Arc<dyn TrackLocal + Send + Sync>> + '_ {
        self.audio.iter().chain(self.video.iter()).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// Camera/microphone boundary.
///
/// Acquisition failures surface to the caller and the call flow does not
/// proceed; there is no retry loop.
#[async_trait]
pub trait MediaGateway: Send + Sync {
    async fn acquire(&self) -> Result<LocalTracks, MediaError>;

    fn set_audio_enabled(&self, enabled: bool);

    fn set_video_enabled(&self, enabled: bool);

    /// Stop capture and drop device handles. Called on full teardown.
    fn release(&self);
}

const SAMPLE_PERIOD: Duration = Duration::from_millis(100);

/// Gateway producing silent audio and blank video samples.
///
/// Used by tests and demos: the RTP flow it generates is enough to drive
/// `on_track` on the remote side without touching real devices.
pub struct SampleMedia {
    audio_enabled: Arc<AtomicBool>,
    video_enabled: Arc<AtomicBool>,
    writers: Mutex<Vec<JoinHandle<()>>>,
}

impl SampleMedia {
    pub fn new() -> Self {
        Self {
            audio_enabled: Arc::new(AtomicBool::new(true)),
            video_enabled: Arc::new(AtomicBool::new(true)),
            writers: Mutex::new(Vec::new()),
        }
    }

    fn spawn_writer(
        &self,
        track: Arc<TrackLocalStaticSample>,
        enabled: Arc<AtomicBool>,
        payload: &'static [u8],
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if enabled.load(Ordering::Relaxed) {
                    let sample = Sample {
                        data: Bytes::from_static(payload),
                        duration: SAMPLE_PERIOD,
                        ..Default::default()
                    };
                    // Unbound tracks reject writes until negotiation attaches
                    // them; keep ticking until then.
                    let _ = track.write_sample(&sample).await;
                }
                tokio::time::sleep(SAMPLE_PERIOD).await;
            }
        })
    }
}

impl Default for SampleMedia {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaGateway for SampleMedia {
    async fn acquire(&self) -> Result<LocalTracks, MediaError> {
        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_string(),
            "mesh-media".to_string(),
        ));
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90_000,
                ..Default::default()
            },
            "video".to_string(),
            "mesh-media".to_string(),
        ));

        let mut writers = self.writers.lock();
        writers.push(self.spawn_writer(
            audio.clone(),
            self.audio_enabled.clone(),
            &[0u8; 4],
        ));
        writers.push(self.spawn_writer(
            video.clone(),
            self.video_enabled.clone(),
            &[0u8; 16],
        ));

        Ok(LocalTracks {
            audio: Some(audio),
            video: Some(video),
        })
    }

    fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::Relaxed);
    }

    fn set_video_enabled(&self, enabled: bool) {
        self.video_enabled.store(enabled, Ordering::Relaxed);
    }

    fn release(&self) {
        for writer in self.writers.lock().drain(..) {
            writer.abort();
        }
    }
}

impl Drop for SampleMedia {
    fn drop(&mut self) {
        self.release();
    }
}

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::Result;

const TAP_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn codec_capability(&self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "".to_owned(),
                rtcp_feedback: vec![],
            },
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

pub(crate) fn random_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A local media track: the outbound RTP binding plus enabled/ended state.
///
/// Samples written while the track is disabled or after it ended are
/// dropped. Every written sample is also published on a broadcast tap that
/// recorders subscribe to.
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
    local: Arc<TrackLocalStaticSample>,
    tap: broadcast::Sender<Arc<Sample>>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>, stream_id: &str) -> Arc<Self> {
        let id = random_id();
        let local = Arc::new(TrackLocalStaticSample::new(
            kind.codec_capability(),
            id.clone(),
            stream_id.to_string(),
        ));
        let (ended, _) = watch::channel(false);
        let (tap, _) = broadcast::channel(TAP_CAPACITY);

        Arc::new(Self {
            id,
            kind,
            label: label.into(),
            enabled: AtomicBool::new(true),
            ended,
            local,
            tap,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        *self.ended.borrow()
    }

    /// Stop the track. Later calls are no-ops.
    pub fn stop(&self) {
        if !self.ended.send_replace(true) {
            tracing::debug!(track_id = %self.id, kind = %self.kind, label = %self.label, "Track stopped");
        }
    }

    pub fn ended(&self) -> watch::Receiver<bool> {
        self.ended.subscribe()
    }

    /// Resolves once the track has ended.
    pub async fn wait_ended(&self) {
        let mut rx = self.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    pub fn local(&self) -> Arc<TrackLocalStaticSample> {
        self.local.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Sample>> {
        self.tap.subscribe()
    }

    pub async fn write_sample(&self, sample: Sample) -> Result<()> {
        if self.is_ended() || !self.is_enabled() {
            return Ok(());
        }

        let sample = Arc::new(sample);
        // no subscribers is fine
        let _ = self.tap.send(sample.clone());
        self.local.write_sample(&sample).await?;
        Ok(())
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// An ordered set of tracks captured together.
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<Arc<MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn video_track(&self) -> Option<Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video).cloned()
    }

    pub fn audio_track(&self) -> Option<Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio).cloned()
    }

    pub fn audio_tracks(&self) -> Vec<Arc<MediaTrack>> {
        self.tracks
            .iter()
            .filter(|t| t.kind() == TrackKind::Audio)
            .cloned()
            .collect()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

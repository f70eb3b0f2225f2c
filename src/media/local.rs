use std::sync::Arc;
use tokio::sync::RwLock;

use super::devices::{MediaConstraints, MediaDevices};
use super::track::{MediaStream, MediaTrack};
use crate::error::{MeetError, Result};

/// Camera and microphone for the session. Toggling only flips the enabled
/// flag of a track; the set of tracks never changes after initialization.
pub struct LocalMedia {
    devices: Arc<dyn MediaDevices>,
    stream: RwLock<Option<MediaStream>>,
}

impl LocalMedia {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            stream: RwLock::new(None),
        }
    }

    /// Acquire camera and/or microphone. Calling again returns the stream
    /// that is already active.
    pub async fn initialize(&self, want_video: bool, want_audio: bool) -> Result<MediaStream> {
        let mut stream = self.stream.write().await;
        if let Some(active) = stream.as_ref() {
            return Ok(active.clone());
        }

        let acquired = self
            .devices
            .get_user_media(MediaConstraints::new(want_video, want_audio))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to acquire local media");
                e
            })?;

        tracing::info!(
            stream_id = %acquired.id,
            tracks = acquired.tracks.len(),
            "Local media initialized"
        );
        *stream = Some(acquired.clone());
        Ok(acquired)
    }

    pub async fn stream(&self) -> Option<MediaStream> {
        self.stream.read().await.clone()
    }

    pub async fn camera_track(&self) -> Option<Arc<MediaTrack>> {
        self.stream.read().await.as_ref().and_then(|s| s.video_track())
    }

    pub async fn microphone_track(&self) -> Option<Arc<MediaTrack>> {
        self.stream.read().await.as_ref().and_then(|s| s.audio_track())
    }

    /// Returns the new enabled state.
    pub async fn toggle_audio(&self) -> Result<bool> {
        let track = self.microphone_track().await.ok_or(MeetError::MediaNotInitialized)?;
        Ok(Self::toggle(&track))
    }

    /// Returns the new enabled state.
    pub async fn toggle_video(&self) -> Result<bool> {
        let track = self.camera_track().await.ok_or(MeetError::MediaNotInitialized)?;
        Ok(Self::toggle(&track))
    }

    fn toggle(track: &MediaTrack) -> bool {
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        tracing::info!(track_id = %track.id(), kind = %track.kind(), enabled, "Local track toggled");
        enabled
    }

    /// Stop every device track.
    pub async fn stop(&self) {
        if let Some(stream) = self.stream.write().await.take() {
            stream.stop_all();
            tracing::info!(stream_id = %stream.id, "Local media stopped");
        }
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.get_mut().take() {
            stream.stop_all();
        }
    }
}

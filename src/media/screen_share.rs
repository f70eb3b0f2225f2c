use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use super::devices::{MediaConstraints, MediaDevices};
use super::local::LocalMedia;
use super::track::{MediaStream, MediaTrack};
use crate::client::SignalingChannel;
use crate::error::{MeetError, Result};
use crate::mesh::MeshView;
use crate::protocol::ClientEvent;

struct ActiveShare {
    stream: MediaStream,
}

/// Local screen share. While active, the capture track is the outbound video
/// of every peer connection.
pub struct ScreenShare {
    room_id: String,
    devices: Arc<dyn MediaDevices>,
    signaling: Arc<dyn SignalingChannel>,
    local_media: Arc<LocalMedia>,
    mesh: MeshView,
    active: Mutex<Option<ActiveShare>>,
    outbound_video: watch::Sender<Option<Arc<MediaTrack>>>,
}

impl ScreenShare {
    pub fn new(
        room_id: impl Into<String>,
        devices: Arc<dyn MediaDevices>,
        signaling: Arc<dyn SignalingChannel>,
        local_media: Arc<LocalMedia>,
        mesh: MeshView,
    ) -> Arc<Self> {
        let (outbound_video, _) = watch::channel(None);
        Arc::new(Self {
            room_id: room_id.into(),
            devices,
            signaling,
            local_media,
            mesh,
            active: Mutex::new(None),
            outbound_video,
        })
    }

    /// The screen track while sharing, `None` otherwise.
    pub fn outbound_video(&self) -> watch::Receiver<Option<Arc<MediaTrack>>> {
        self.outbound_video.subscribe()
    }

    pub fn is_sharing(&self) -> bool {
        self.outbound_video.borrow().is_some()
    }

    /// Start sharing. Returns the active stream when already sharing.
    pub async fn start(self: &Arc<Self>) -> Result<MediaStream> {
        let mut active = self.active.lock().await;
        if let Some(share) = active.as_ref() {
            return Ok(share.stream.clone());
        }

        let stream = self
            .devices
            .get_display_media(MediaConstraints::video_only())
            .await
            .map_err(|e| {
                tracing::warn!(room_id = %self.room_id, error = %e, "Display capture failed");
                e
            })?;

        let Some(screen) = stream.video_track() else {
            stream.stop_all();
            return Err(MeetError::DeviceUnavailable(
                "display capture returned no video".to_string(),
            ));
        };

        self.outbound_video.send_replace(Some(screen.clone()));
        self.announce(true);
        self.replace_all(Some(screen.clone())).await;

        let share = self.clone();
        let stream_id = stream.id.clone();
        let ended_track = screen.clone();
        tokio::spawn(async move {
            ended_track.wait_ended().await;
            share.stop_share(Some(&stream_id)).await;
        });

        tracing::info!(room_id = %self.room_id, track_id = %screen.id(), "Screen share started");
        *active = Some(ActiveShare {
            stream: stream.clone(),
        });
        Ok(stream)
    }

    /// Stop sharing and revert every peer to the camera. No-op when idle.
    pub async fn stop(&self) {
        self.stop_share(None).await;
    }

    /// `only` limits the stop to a specific capture, so a watcher of an old
    /// share never ends a newer one.
    async fn stop_share(&self, only: Option<&str>) {
        let share = {
            let mut active = self.active.lock().await;
            match (active.as_ref(), only) {
                (None, _) => return,
                (Some(share), Some(id)) if share.stream.id != id => return,
                _ => active.take(),
            }
        };
        let Some(share) = share else { return };

        share.stream.stop_all();
        self.outbound_video.send_replace(None);
        self.announce(false);

        let camera = self.local_media.camera_track().await;
        self.replace_all(camera).await;

        tracing::info!(
            room_id = %self.room_id,
            external = only.is_some(),
            "Screen share stopped"
        );
    }

    fn announce(&self, is_sharing: bool) {
        let Some(user_id) = self.signaling.local_id() else {
            tracing::debug!(is_sharing, "No identity, screen share status not sent");
            return;
        };
        self.signaling.emit(ClientEvent::ScreenShareStatus {
            room_id: self.room_id.clone(),
            is_sharing,
            user_id,
        });
    }

    /// Re-announce after a reconnect.
    pub fn resend_status(&self) {
        if self.is_sharing() {
            self.announce(true);
        }
    }

    async fn replace_all(&self, track: Option<Arc<MediaTrack>>) {
        for link in self.mesh.links().await {
            if let Err(e) = link.replace_video_track(track.clone()).await {
                tracing::warn!(peer_id = %link.remote_id(), error = %e, "Failed to swap outbound video");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDevices, FakeSignaling};
    use std::time::Duration;

    async fn setup() -> (Arc<ScreenShare>, Arc<FakeDevices>, Arc<FakeSignaling>, Arc<LocalMedia>) {
        let devices = FakeDevices::new();
        let signaling = FakeSignaling::new("me");
        let local = Arc::new(LocalMedia::new(devices.clone()));
        local.initialize(true, true).await.unwrap();
        let share = ScreenShare::new("X", devices.clone(), signaling.clone(), local.clone(), MeshView::new());
        (share, devices, signaling, local)
    }

    fn statuses(signaling: &FakeSignaling) -> Vec<bool> {
        signaling
            .emitted()
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::ScreenShareStatus { is_sharing, .. } => Some(is_sharing),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_start_and_stop_announce() {
        let (share, _devices, signaling, _local) = setup().await;

        let stream = share.start().await.unwrap();
        assert!(share.is_sharing());
        let again = share.start().await.unwrap();
        assert_eq!(stream.id, again.id);

        share.stop().await;
        share.stop().await;
        assert!(!share.is_sharing());
        assert!(stream.tracks.iter().all(|t| t.is_ended()));
        assert_eq!(statuses(&signaling), vec![true, false]);
    }

    #[tokio::test]
    async fn test_denied_capture_has_no_side_effects() {
        let (share, devices, signaling, _local) = setup().await;
        devices.deny_display_media();

        let err = share.start().await.unwrap_err();
        assert!(err.is_permission_denied());
        assert!(!share.is_sharing());
        assert!(statuses(&signaling).is_empty());
    }

    #[tokio::test]
    async fn test_external_stop_reverts() {
        let (share, _devices, signaling, _local) = setup().await;
        let stream = share.start().await.unwrap();

        // the user ends the capture from outside the application
        stream.video_track().unwrap().stop();

        tokio::time::timeout(Duration::from_secs(1), async {
            while share.is_sharing() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("share stopped");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(statuses(&signaling), vec![true, false]);
    }
}

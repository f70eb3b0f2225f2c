use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::mixer::AudioMix;
use super::recorder::{RecordedFile, Recorder, RecorderFactory, RecordingSources};
use super::state::RecordingState;
use super::store::RecordingStore;
use crate::client::{ChannelEvent, SignalingChannel};
use crate::error::{MeetError, Result};
use crate::media::{LocalMedia, MediaConstraints, MediaDevices, MediaStream};
use crate::protocol::{ClientEvent, ServerEvent};

/// User-facing outcome of recording operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingNotice {
    Started,
    Denied { reason: String },
    CaptureFailed { reason: String },
    RemoteStarted { holder: String },
    RemoteStopped { holder: String },
    /// The lock was released by the server while recording locally.
    LockLost,
    RecorderFailed { reason: String },
    UploadFailed { reason: String },
    FinalizeFailed { reason: String },
    Uploaded { url: String },
}

/// Collaborators of the coordinator
pub struct RecordingServices {
    pub signaling: Arc<dyn SignalingChannel>,
    pub devices: Arc<dyn MediaDevices>,
    pub local_media: Arc<LocalMedia>,
    pub recorders: Arc<dyn RecorderFactory>,
    pub store: Arc<dyn RecordingStore>,
}

struct ActiveRecording {
    capture: MediaStream,
    mix: Arc<AudioMix>,
    recorder: Box<dyn Recorder>,
    heartbeat: JoinHandle<()>,
}

impl ActiveRecording {
    /// Safe to run any number of times.
    fn cleanup(&self) {
        self.heartbeat.abort();
        self.recorder.destroy();
        self.mix.close();
        self.capture.stop_all();
    }
}

/// Single-recorder protocol for one room. The server arbitrates the lock;
/// this side only follows grants and broadcasts.
pub struct RecordingCoordinator {
    room_id: String,
    services: RecordingServices,
    ack_timeout: Duration,
    heartbeat_interval: Duration,
    state: watch::Sender<RecordingState>,
    /// Last other identity the server announced as holder. Outlives local
    /// recording so an upload can settle into the right state.
    remote_holder: watch::Sender<Option<String>>,
    active: Mutex<Option<ActiveRecording>>,
    notices: mpsc::UnboundedSender<RecordingNotice>,
}

impl RecordingCoordinator {
    pub fn new(
        room_id: impl Into<String>,
        services: RecordingServices,
        ack_timeout: Duration,
        heartbeat_interval: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RecordingNotice>) {
        let (state, _) = watch::channel(RecordingState::Idle);
        let (remote_holder, _) = watch::channel(None);
        let (notices, notices_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                room_id: room_id.into(),
                services,
                ack_timeout,
                heartbeat_interval,
                state,
                remote_holder,
                active: Mutex::new(None),
                notices,
            }),
            notices_rx,
        )
    }

    pub fn state(&self) -> watch::Receiver<RecordingState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> RecordingState {
        self.state.borrow().clone()
    }

    pub fn can_start(&self) -> bool {
        self.state.borrow().can_start()
    }

    fn set_state(&self, state: RecordingState) {
        tracing::debug!(room_id = %self.room_id, state = ?state, "Recording state");
        self.state.send_replace(state);
    }

    /// State to fall back to once local recording is over.
    fn settled_state(&self) -> RecordingState {
        match self.remote_holder.borrow().clone() {
            Some(holder) => RecordingState::RecordingRemote { holder },
            None => RecordingState::Idle,
        }
    }

    fn notify(&self, notice: RecordingNotice) {
        if self.notices.send(notice).is_err() {
            tracing::debug!("No listener for recording notices");
        }
    }

    fn release_lock(&self) {
        self.services
            .signaling
            .emit(ClientEvent::RequestStopRecord(self.room_id.clone()));
    }

    /// Ask the server for the lock and start recording once granted.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.is_some() || !self.can_start() {
            return Err(MeetError::RecordingInProgress);
        }
        if self.services.signaling.local_id().is_none() {
            return Err(MeetError::NotConnected);
        }

        let ack = self
            .services
            .signaling
            .request(ClientEvent::RequestStartRecord(self.room_id.clone()));
        let response = match tokio::time::timeout(self.ack_timeout, ack).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(MeetError::ConnectionLost),
            Err(_) => {
                // a late grant must not leave the lock held
                self.release_lock();
                tracing::warn!(room_id = %self.room_id, "Recording lock request timed out");
                return Err(MeetError::Timeout("recording lock acknowledgement".to_string()));
            }
        };

        if !response.success {
            let reason = response
                .message
                .unwrap_or_else(|| "recording already in progress".to_string());
            tracing::info!(room_id = %self.room_id, reason = %reason, "Recording lock denied");
            self.notify(RecordingNotice::Denied {
                reason: reason.clone(),
            });
            return Err(MeetError::RecordingLockDenied(reason));
        }

        let heartbeat = heartbeat_interval_for(self.heartbeat_interval, response.lease());
        let recording = match self.begin_capture(heartbeat).await {
            Ok(recording) => recording,
            Err(e) => {
                self.release_lock();
                tracing::error!(room_id = %self.room_id, error = %e, "Recording failed to start");
                self.notify(RecordingNotice::CaptureFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let watcher = self.clone();
        let stream_id = recording.capture.id.clone();
        let video = recording.capture.video_track();
        tokio::spawn(async move {
            if let Some(video) = video {
                video.wait_ended().await;
                tracing::info!(stream_id = %stream_id, "Recording capture ended");
                if let Err(e) = watcher.stop_recording(Some(&stream_id), true).await {
                    tracing::debug!(error = %e, "Stop after capture end failed");
                }
            }
        });

        tracing::info!(room_id = %self.room_id, stream_id = %recording.capture.id, "Recording started");
        *active = Some(recording);
        self.set_state(RecordingState::RecordingLocal);
        self.notify(RecordingNotice::Started);
        Ok(())
    }

    async fn begin_capture(&self, heartbeat_interval: Duration) -> Result<ActiveRecording> {
        let capture = self
            .services
            .devices
            .get_display_media(MediaConstraints::new(true, true))
            .await?;

        let Some(video) = capture.video_track() else {
            capture.stop_all();
            return Err(MeetError::DeviceUnavailable(
                "display capture returned no video".to_string(),
            ));
        };

        let mix = Arc::new(AudioMix::new(
            capture.audio_track(),
            self.services.local_media.microphone_track().await,
        ));
        if mix.is_empty() {
            tracing::warn!(room_id = %self.room_id, "No audio source available, recording video only");
        }

        let sources = RecordingSources {
            video,
            audio: mix.clone(),
        };
        let recorder = match self.services.recorders.start(&self.room_id, sources) {
            Ok(recorder) => recorder,
            Err(e) => {
                mix.close();
                capture.stop_all();
                return Err(e);
            }
        };

        let heartbeat = tokio::spawn(send_heartbeats(
            self.services.signaling.clone(),
            self.room_id.clone(),
            heartbeat_interval,
        ));

        Ok(ActiveRecording {
            capture,
            mix,
            recorder,
            heartbeat,
        })
    }

    /// Stop, release the lock and upload. A no-op unless recording locally,
    /// so a stop during upload does nothing.
    pub async fn stop(&self) -> Result<()> {
        self.stop_recording(None, true).await
    }

    /// `only` restricts the stop to one capture. `release` is false when the
    /// server has already dropped the lock.
    async fn stop_recording(&self, only: Option<&str>, release: bool) -> Result<()> {
        let recording = {
            let mut active = self.active.lock().await;
            match (active.as_ref(), only) {
                (None, _) => return Ok(()),
                (Some(recording), Some(id)) if recording.capture.id != id => return Ok(()),
                _ => active.take(),
            }
        };
        let Some(recording) = recording else {
            return Ok(());
        };

        let finished = recording.recorder.stop().await;
        recording.cleanup();
        if release {
            self.release_lock();
        }
        self.set_state(RecordingState::Uploading);

        let outcome = match finished {
            Ok(file) => self.upload(file).await,
            Err(e) => {
                tracing::error!(room_id = %self.room_id, error = %e, "Recorder failed to finish");
                self.notify(RecordingNotice::RecorderFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        };

        self.set_state(self.settled_state());
        outcome
    }

    async fn upload(&self, file: RecordedFile) -> Result<()> {
        let url = match self.services.store.upload(&file).await {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(room_id = %self.room_id, file = %file.path.display(), error = %e, "Recording upload failed");
                self.notify(RecordingNotice::UploadFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        if let Err(e) = self.services.store.finalize(&self.room_id, &url).await {
            tracing::error!(room_id = %self.room_id, url = %url, error = %e, "Failed to attach recording to meeting");
            self.notify(RecordingNotice::FinalizeFailed {
                reason: e.to_string(),
            });
            return Err(e);
        }

        tracing::info!(room_id = %self.room_id, url = %url, "Recording uploaded");
        self.notify(RecordingNotice::Uploaded { url });
        Ok(())
    }

    /// Drop the recording without uploading and release the lock.
    pub async fn teardown(&self) {
        let Some(recording) = self.active.lock().await.take() else {
            return;
        };
        recording.cleanup();
        self.release_lock();
        self.set_state(self.settled_state());
        tracing::info!(room_id = %self.room_id, "Recording torn down");
    }

    /// Returns the applied gain, `None` when not recording or without system audio.
    pub async fn set_display_gain(&self, gain: f32) -> Option<f32> {
        self.active.lock().await.as_ref()?.mix.set_display_gain(gain)
    }

    pub async fn set_microphone_gain(&self, gain: f32) -> Option<f32> {
        self.active.lock().await.as_ref()?.mix.set_microphone_gain(gain)
    }

    /// Follow lock broadcasts and connection loss.
    pub fn handle_channel_event(self: &Arc<Self>, event: &ChannelEvent) {
        match event {
            ChannelEvent::Server(ServerEvent::RecordStarted { user_id }) => {
                if self.is_local(user_id) {
                    return;
                }
                self.remote_holder.send_replace(Some(user_id.clone()));
                match self.current_state() {
                    RecordingState::Idle | RecordingState::RecordingRemote { .. } => {
                        tracing::info!(room_id = %self.room_id, holder = %user_id, "Remote recording started");
                        self.set_state(RecordingState::RecordingRemote {
                            holder: user_id.clone(),
                        });
                        self.notify(RecordingNotice::RemoteStarted {
                            holder: user_id.clone(),
                        });
                    }
                    RecordingState::Uploading => {
                        tracing::info!(room_id = %self.room_id, holder = %user_id, "Remote recording started during upload");
                        self.notify(RecordingNotice::RemoteStarted {
                            holder: user_id.clone(),
                        });
                    }
                    RecordingState::RecordingLocal => {
                        tracing::warn!(holder = %user_id, "Ignoring remote recording start while recording locally");
                    }
                }
            }
            ChannelEvent::Server(ServerEvent::RecordStopped { user_id }) => {
                if self.is_local(user_id) {
                    if self.current_state().is_local() {
                        tracing::warn!(room_id = %self.room_id, "Recording lock released by server");
                        self.notify(RecordingNotice::LockLost);
                        self.spawn_stop(false);
                    }
                    return;
                }
                let was_holder = self.remote_holder.send_if_modified(|holder| {
                    if holder.as_deref() == Some(user_id.as_str()) {
                        *holder = None;
                        true
                    } else {
                        false
                    }
                });
                if was_holder && self.current_state() == RecordingState::Uploading {
                    tracing::info!(room_id = %self.room_id, holder = %user_id, "Remote recording stopped during upload");
                    self.notify(RecordingNotice::RemoteStopped {
                        holder: user_id.clone(),
                    });
                }
                if self.current_state().remote_holder() == Some(user_id.as_str()) {
                    tracing::info!(room_id = %self.room_id, holder = %user_id, "Remote recording stopped");
                    self.set_state(RecordingState::Idle);
                    self.notify(RecordingNotice::RemoteStopped {
                        holder: user_id.clone(),
                    });
                }
            }
            ChannelEvent::Disconnected => {
                // holders are re-announced on rejoin
                self.remote_holder.send_replace(None);
                match self.current_state() {
                    RecordingState::RecordingLocal => self.spawn_stop(false),
                    RecordingState::RecordingRemote { .. } => self.set_state(RecordingState::Idle),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn is_local(&self, user_id: &str) -> bool {
        self.services.signaling.local_id().as_deref() == Some(user_id)
    }

    fn spawn_stop(self: &Arc<Self>, release: bool) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.stop_recording(None, release).await {
                tracing::debug!(error = %e, "Recording stop failed");
            }
        });
    }
}

/// Renew at least three times per server lease, never faster than 1ms.
fn heartbeat_interval_for(configured: Duration, lease: Option<Duration>) -> Duration {
    match lease {
        Some(lease) => configured.min(lease / 3).max(Duration::from_millis(1)),
        None => configured,
    }
}

async fn send_heartbeats(signaling: Arc<dyn SignalingChannel>, room_id: String, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        signaling.emit(ClientEvent::RecordHeartbeat(room_id.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AckResponse;
    use crate::testing::{FakeDevices, FakeRecorderFactory, FakeSignaling, FakeStore};

    struct Harness {
        coordinator: Arc<RecordingCoordinator>,
        notices: mpsc::UnboundedReceiver<RecordingNotice>,
        signaling: Arc<FakeSignaling>,
        devices: Arc<FakeDevices>,
        recorders: Arc<FakeRecorderFactory>,
        store: Arc<FakeStore>,
    }

    async fn harness() -> Harness {
        harness_with(FakeDevices::new(), true).await
    }

    async fn harness_with(devices: Arc<FakeDevices>, microphone: bool) -> Harness {
        let signaling = FakeSignaling::new("me");
        let local = Arc::new(LocalMedia::new(devices.clone()));
        local.initialize(true, microphone).await.unwrap();
        let recorders = FakeRecorderFactory::new();
        let store = FakeStore::new();

        let (coordinator, notices) = RecordingCoordinator::new(
            "room-1",
            RecordingServices {
                signaling: signaling.clone(),
                devices: devices.clone(),
                local_media: local,
                recorders: recorders.clone(),
                store: store.clone(),
            },
            Duration::from_millis(100),
            Duration::from_millis(20),
        );
        Harness {
            coordinator,
            notices,
            signaling,
            devices,
            recorders,
            store,
        }
    }

    fn stop_requests(signaling: &FakeSignaling) -> usize {
        signaling
            .emitted()
            .iter()
            .filter(|e| matches!(e, ClientEvent::RequestStopRecord(_)))
            .count()
    }

    fn drain(notices: &mut mpsc::UnboundedReceiver<RecordingNotice>) -> Vec<RecordingNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            out.push(notice);
        }
        out
    }

    #[tokio::test]
    async fn test_granted_start_records_and_uploads() {
        let mut h = harness().await;
        h.coordinator.start().await.unwrap();
        assert_eq!(h.coordinator.current_state(), RecordingState::RecordingLocal);
        assert!(!h.coordinator.can_start());

        let recorder = h.recorders.last().unwrap();
        assert!(recorder.has_video());
        assert_eq!(recorder.audio_inputs(), 2);

        h.coordinator.stop().await.unwrap();
        assert_eq!(h.coordinator.current_state(), RecordingState::Idle);
        assert!(recorder.is_stopped());
        assert!(recorder.is_destroyed());
        assert!(recorder.is_mix_closed());
        assert!(recorder.capture_ended());
        assert_eq!(stop_requests(&h.signaling), 1);
        assert_eq!(h.store.finalized(), vec![("room-1".to_string(), "https://files/rec-1".to_string())]);

        let notices = drain(&mut h.notices);
        assert_eq!(notices.first(), Some(&RecordingNotice::Started));
        assert_eq!(
            notices.last(),
            Some(&RecordingNotice::Uploaded {
                url: "https://files/rec-1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_denied_start_is_abandoned() {
        let mut h = harness().await;
        h.signaling.set_ack(Some(AckResponse::denied("held by a")));

        let err = h.coordinator.start().await.unwrap_err();
        assert!(matches!(err, MeetError::RecordingLockDenied(_)));
        assert_eq!(h.coordinator.current_state(), RecordingState::Idle);
        assert_eq!(h.devices.display_media_calls(), 0);
        assert_eq!(
            drain(&mut h.notices),
            vec![RecordingNotice::Denied {
                reason: "held by a".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_ack_timeout_releases_lock() {
        let h = harness().await;
        h.signaling.set_ack(None);

        let err = h.coordinator.start().await.unwrap_err();
        assert!(matches!(err, MeetError::Timeout(_)));
        assert_eq!(stop_requests(&h.signaling), 1);
        assert!(h.coordinator.can_start());
    }

    #[tokio::test]
    async fn test_capture_failure_releases_lock() {
        let mut h = harness().await;
        h.devices.deny_display_media();

        let err = h.coordinator.start().await.unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(stop_requests(&h.signaling), 1);
        assert_eq!(h.coordinator.current_state(), RecordingState::Idle);
        assert!(matches!(
            drain(&mut h.notices).as_slice(),
            [RecordingNotice::CaptureFailed { .. }]
        ));
    }

    #[tokio::test]
    async fn test_recorder_failure_stops_capture() {
        let h = harness().await;
        h.recorders.fail_next_start();

        assert!(h.coordinator.start().await.is_err());
        assert_eq!(stop_requests(&h.signaling), 1);
        let capture = h.devices.last_display_stream().unwrap();
        assert!(capture.tracks.iter().all(|t| t.is_ended()));
    }

    #[tokio::test]
    async fn test_upload_failure_still_cleans_up() {
        let mut h = harness().await;
        h.store.fail_uploads();
        h.coordinator.start().await.unwrap();

        assert!(h.coordinator.stop().await.is_err());
        let recorder = h.recorders.last().unwrap();
        assert!(recorder.is_destroyed());
        assert!(recorder.capture_ended());
        assert_eq!(stop_requests(&h.signaling), 1);
        assert_eq!(h.coordinator.current_state(), RecordingState::Idle);
        assert!(drain(&mut h.notices)
            .iter()
            .any(|n| matches!(n, RecordingNotice::UploadFailed { .. })));
        assert!(h.store.finalized().is_empty());
    }

    #[tokio::test]
    async fn test_stop_during_upload_is_noop() {
        let h = harness().await;
        let gate = h.store.hold_uploads();
        h.coordinator.start().await.unwrap();

        let coordinator = h.coordinator.clone();
        let first = tokio::spawn(async move { coordinator.stop().await });
        let mut state = h.coordinator.state();
        state.wait_for(|s| *s == RecordingState::Uploading).await.unwrap();

        h.coordinator.stop().await.unwrap();
        assert_eq!(h.coordinator.current_state(), RecordingState::Uploading);
        assert!(h.coordinator.start().await.is_err());

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(h.coordinator.current_state(), RecordingState::Idle);
        assert_eq!(h.store.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_external_capture_end_stops_recording() {
        let h = harness().await;
        h.coordinator.start().await.unwrap();

        let capture = h.devices.last_display_stream().unwrap();
        capture.video_track().unwrap().stop();

        let mut state = h.coordinator.state();
        tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| *s == RecordingState::Idle))
            .await
            .expect("returned to idle")
            .unwrap();
        assert_eq!(h.store.upload_count(), 1);
        assert_eq!(stop_requests(&h.signaling), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_while_recording() {
        let h = harness().await;
        h.coordinator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(70)).await;
        h.coordinator.stop().await.unwrap();

        let beats = h
            .signaling
            .emitted()
            .iter()
            .filter(|e| matches!(e, ClientEvent::RecordHeartbeat(room) if room == "room-1"))
            .count();
        assert!(beats >= 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let after = h
            .signaling
            .emitted()
            .iter()
            .filter(|e| matches!(e, ClientEvent::RecordHeartbeat(_)))
            .count();
        assert_eq!(beats, after);
    }

    #[tokio::test]
    async fn test_remote_holder_blocks_start_until_stopped() {
        let mut h = harness().await;
        let started = ChannelEvent::Server(ServerEvent::RecordStarted {
            user_id: "a".to_string(),
        });
        h.coordinator.handle_channel_event(&started);
        assert_eq!(
            h.coordinator.current_state(),
            RecordingState::RecordingRemote {
                holder: "a".to_string()
            }
        );
        assert!(matches!(h.coordinator.start().await, Err(MeetError::RecordingInProgress)));

        // a stop naming someone else does not re-enable
        h.coordinator
            .handle_channel_event(&ChannelEvent::Server(ServerEvent::RecordStopped {
                user_id: "b".to_string(),
            }));
        assert!(!h.coordinator.can_start());

        h.coordinator
            .handle_channel_event(&ChannelEvent::Server(ServerEvent::RecordStopped {
                user_id: "a".to_string(),
            }));
        assert!(h.coordinator.can_start());
        assert_eq!(
            drain(&mut h.notices),
            vec![
                RecordingNotice::RemoteStarted {
                    holder: "a".to_string()
                },
                RecordingNotice::RemoteStopped {
                    holder: "a".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_own_broadcast_ignored() {
        let h = harness().await;
        h.coordinator.start().await.unwrap();
        h.coordinator
            .handle_channel_event(&ChannelEvent::Server(ServerEvent::RecordStarted {
                user_id: "me".to_string(),
            }));
        assert_eq!(h.coordinator.current_state(), RecordingState::RecordingLocal);
        h.coordinator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_while_recording_runs_stop_without_release() {
        let h = harness().await;
        h.coordinator.start().await.unwrap();

        h.coordinator.handle_channel_event(&ChannelEvent::Disconnected);
        let mut state = h.coordinator.state();
        tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| *s == RecordingState::Idle))
            .await
            .expect("returned to idle")
            .unwrap();

        assert_eq!(stop_requests(&h.signaling), 0);
        assert!(h.recorders.last().unwrap().is_destroyed());
        assert_eq!(h.store.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_clears_remote_holder() {
        let h = harness().await;
        h.coordinator
            .handle_channel_event(&ChannelEvent::Server(ServerEvent::RecordStarted {
                user_id: "a".to_string(),
            }));
        h.coordinator.handle_channel_event(&ChannelEvent::Disconnected);
        assert_eq!(h.coordinator.current_state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_gains_adjust_live_mix() {
        let h = harness().await;
        assert_eq!(h.coordinator.set_display_gain(0.5).await, None);

        h.coordinator.start().await.unwrap();
        assert_eq!(h.coordinator.set_display_gain(0.5).await, Some(0.5));
        assert_eq!(h.coordinator.set_microphone_gain(20.0).await, Some(10.0));
        assert_eq!(h.recorders.last().unwrap().gains(), vec![0.5, 10.0]);

        h.coordinator.teardown().await;
        assert_eq!(h.coordinator.current_state(), RecordingState::Idle);
        assert_eq!(stop_requests(&h.signaling), 1);
        assert_eq!(h.store.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_records_video_only_without_audio_sources() {
        let devices = FakeDevices::new();
        devices.without_display_audio();
        let mut h = harness_with(devices, false).await;

        h.coordinator.start().await.unwrap();
        assert_eq!(h.coordinator.current_state(), RecordingState::RecordingLocal);
        let recorder = h.recorders.last().unwrap();
        assert!(recorder.has_video());
        assert_eq!(recorder.audio_inputs(), 0);
        assert_eq!(h.coordinator.set_microphone_gain(2.0).await, None);

        h.coordinator.stop().await.unwrap();
        assert!(recorder.is_destroyed());
        assert!(recorder.capture_ended());
        assert_eq!(h.store.upload_count(), 1);
        assert_eq!(stop_requests(&h.signaling), 1);
        assert_eq!(h.coordinator.current_state(), RecordingState::Idle);
        assert!(drain(&mut h.notices)
            .iter()
            .any(|n| matches!(n, RecordingNotice::Uploaded { .. })));
    }

    #[tokio::test]
    async fn test_holder_taking_lock_during_upload_keeps_start_disabled() {
        let h = harness().await;
        let gate = h.store.hold_uploads();
        h.coordinator.start().await.unwrap();

        let coordinator = h.coordinator.clone();
        let stopping = tokio::spawn(async move { coordinator.stop().await });
        let mut state = h.coordinator.state();
        state.wait_for(|s| *s == RecordingState::Uploading).await.unwrap();

        h.coordinator
            .handle_channel_event(&ChannelEvent::Server(ServerEvent::RecordStarted {
                user_id: "b".to_string(),
            }));
        assert_eq!(h.coordinator.current_state(), RecordingState::Uploading);

        gate.notify_one();
        stopping.await.unwrap().unwrap();
        assert_eq!(
            h.coordinator.current_state(),
            RecordingState::RecordingRemote {
                holder: "b".to_string()
            }
        );
        assert!(!h.coordinator.can_start());

        h.coordinator
            .handle_channel_event(&ChannelEvent::Server(ServerEvent::RecordStopped {
                user_id: "b".to_string(),
            }));
        assert!(h.coordinator.can_start());
    }

    #[tokio::test]
    async fn test_holder_done_before_upload_ends_settles_idle() {
        let h = harness().await;
        let gate = h.store.hold_uploads();
        h.coordinator.start().await.unwrap();

        let coordinator = h.coordinator.clone();
        let stopping = tokio::spawn(async move { coordinator.stop().await });
        let mut state = h.coordinator.state();
        state.wait_for(|s| *s == RecordingState::Uploading).await.unwrap();

        for event in [
            ServerEvent::RecordStarted {
                user_id: "b".to_string(),
            },
            ServerEvent::RecordStopped {
                user_id: "b".to_string(),
            },
        ] {
            h.coordinator.handle_channel_event(&ChannelEvent::Server(event));
        }

        gate.notify_one();
        stopping.await.unwrap().unwrap();
        assert_eq!(h.coordinator.current_state(), RecordingState::Idle);
    }

    #[test]
    fn test_heartbeat_follows_server_lease() {
        let configured = Duration::from_secs(10);
        assert_eq!(heartbeat_interval_for(configured, None), configured);
        assert_eq!(
            heartbeat_interval_for(configured, Some(Duration::from_secs(6))),
            Duration::from_secs(2)
        );
        assert_eq!(
            heartbeat_interval_for(configured, Some(Duration::from_secs(60))),
            configured
        );
        assert_eq!(
            heartbeat_interval_for(configured, Some(Duration::from_millis(2))),
            Duration::from_millis(1)
        );
    }

    #[tokio::test]
    async fn test_short_server_lease_speeds_up_heartbeats() {
        let h = harness().await;
        h.signaling
            .set_ack(Some(AckResponse::granted().with_lease(Some(Duration::from_millis(15)))));
        h.coordinator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        h.coordinator.stop().await.unwrap();

        let beats = h
            .signaling
            .emitted()
            .iter()
            .filter(|e| matches!(e, ClientEvent::RecordHeartbeat(_)))
            .count();
        assert!(beats >= 5, "expected a heartbeat every 5ms, saw {}", beats);
    }
}

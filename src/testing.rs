//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{oneshot, Notify};

use crate::client::SignalingChannel;
use crate::error::{MeetError, Result};
use crate::media::track::random_id;
use crate::media::{MediaConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind};
use crate::mesh::{InboundTrack, LinkEvent, LinkEvents, LinkRole, OutboundTracks, PeerConnector, PeerLink};
use crate::protocol::{AckResponse, ClientEvent, SignalPayload};
use crate::recording::{RecordedFile, Recorder, RecorderFactory, RecordingSources, RecordingStore};

pub struct FakeSignaling {
    local_id: Mutex<Option<String>>,
    emitted: Mutex<Vec<ClientEvent>>,
    /// `None` leaves requests unanswered.
    ack: Mutex<Option<AckResponse>>,
    unanswered: Mutex<Vec<oneshot::Sender<AckResponse>>>,
}

impl FakeSignaling {
    pub fn new(local_id: &str) -> Arc<Self> {
        Arc::new(Self {
            local_id: Mutex::new(Some(local_id.to_string())),
            emitted: Mutex::new(Vec::new()),
            ack: Mutex::new(Some(AckResponse::granted())),
            unanswered: Mutex::new(Vec::new()),
        })
    }

    pub fn set_local_id(&self, id: Option<&str>) {
        *self.local_id.lock().unwrap() = id.map(str::to_string);
    }

    pub fn set_ack(&self, ack: Option<AckResponse>) {
        *self.ack.lock().unwrap() = ack;
    }

    pub fn emitted(&self) -> Vec<ClientEvent> {
        self.emitted.lock().unwrap().clone()
    }
}

impl SignalingChannel for FakeSignaling {
    fn local_id(&self) -> Option<String> {
        self.local_id.lock().unwrap().clone()
    }

    fn emit(&self, event: ClientEvent) {
        self.emitted.lock().unwrap().push(event);
    }

    fn request(&self, event: ClientEvent) -> oneshot::Receiver<AckResponse> {
        self.emitted.lock().unwrap().push(event);
        let (tx, rx) = oneshot::channel();
        match self.ack.lock().unwrap().clone() {
            Some(response) => {
                let _ = tx.send(response);
            }
            None => self.unanswered.lock().unwrap().push(tx),
        }
        rx
    }
}

#[derive(Default)]
pub struct FakeDevices {
    deny_user: AtomicBool,
    deny_display: AtomicBool,
    no_display_audio: AtomicBool,
    user_calls: AtomicUsize,
    display_calls: AtomicUsize,
    last_display: Mutex<Option<MediaStream>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny_user_media(&self) {
        self.deny_user.store(true, Ordering::SeqCst);
    }

    pub fn deny_display_media(&self) {
        self.deny_display.store(true, Ordering::SeqCst);
    }

    /// Display captures come back without system audio.
    pub fn without_display_audio(&self) {
        self.no_display_audio.store(true, Ordering::SeqCst);
    }

    pub fn user_media_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }

    pub fn display_media_calls(&self) -> usize {
        self.display_calls.load(Ordering::SeqCst)
    }

    pub fn last_display_stream(&self) -> Option<MediaStream> {
        self.last_display.lock().unwrap().clone()
    }

    fn stream(video: Option<&str>, audio: Option<&str>) -> MediaStream {
        let stream_id = random_id();
        let mut tracks = Vec::new();
        if let Some(label) = video {
            tracks.push(MediaTrack::new(TrackKind::Video, label, &stream_id));
        }
        if let Some(label) = audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, label, &stream_id));
        }
        MediaStream::new(stream_id, tracks)
    }
}

impl MediaDevices for FakeDevices {
    fn get_user_media(&self, constraints: MediaConstraints) -> BoxFuture<'_, Result<MediaStream>> {
        async move {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            if self.deny_user.load(Ordering::SeqCst) {
                return Err(MeetError::PermissionDenied("camera".to_string()));
            }
            Ok(Self::stream(
                constraints.video.then_some("camera"),
                constraints.audio.then_some("microphone"),
            ))
        }
        .boxed()
    }

    fn get_display_media(&self, constraints: MediaConstraints) -> BoxFuture<'_, Result<MediaStream>> {
        async move {
            self.display_calls.fetch_add(1, Ordering::SeqCst);
            if self.deny_display.load(Ordering::SeqCst) {
                return Err(MeetError::PermissionDenied("display".to_string()));
            }
            let with_audio = constraints.audio && !self.no_display_audio.load(Ordering::SeqCst);
            let stream = Self::stream(Some("display"), with_audio.then_some("display-audio"));
            *self.last_display.lock().unwrap() = Some(stream.clone());
            Ok(stream)
        }
        .boxed()
    }
}

pub struct FakeLink {
    remote_id: String,
    role: LinkRole,
    stable: AtomicBool,
    closed: AtomicBool,
    seeded_video: Option<String>,
    current_video: Mutex<Option<String>>,
    replaced: AtomicUsize,
    applied: Mutex<Vec<SignalPayload>>,
    inbound: Mutex<Vec<InboundTrack>>,
    events: Option<LinkEvents>,
}

impl FakeLink {
    pub fn new(remote_id: &str, role: LinkRole) -> Arc<Self> {
        Self::build(remote_id, role, None, None)
    }

    fn build(
        remote_id: &str,
        role: LinkRole,
        seeded_video: Option<String>,
        events: Option<LinkEvents>,
    ) -> Arc<Self> {
        Arc::new(Self {
            remote_id: remote_id.to_string(),
            role,
            stable: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            current_video: Mutex::new(seeded_video.clone()),
            seeded_video,
            replaced: AtomicUsize::new(0),
            applied: Mutex::new(Vec::new()),
            inbound: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn set_inbound(&self, tracks: Vec<InboundTrack>) {
        *self.inbound.lock().unwrap() = tracks;
    }

    pub fn set_stable(&self, stable: bool) {
        self.stable.store(stable, Ordering::SeqCst);
    }

    pub fn applied_kinds(&self) -> Vec<&'static str> {
        self.applied.lock().unwrap().iter().map(|s| s.kind()).collect()
    }

    pub fn seeded_video(&self) -> Option<String> {
        self.seeded_video.clone()
    }

    pub fn current_video(&self) -> Option<String> {
        self.current_video.lock().unwrap().clone()
    }

    pub fn replace_count(&self) -> usize {
        self.replaced.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Report a local offer to the mesh.
    pub fn emit_offer(&self) {
        if let Some(events) = &self.events {
            events.send(LinkEvent::LocalSignal {
                remote_id: self.remote_id.clone(),
                signal: SignalPayload::Offer {
                    sdp: "v=0".to_string(),
                },
            });
        }
    }

    /// Report a failed connection to the mesh.
    pub fn fail(&self) {
        if let Some(events) = &self.events {
            let _ = events.send(LinkEvent::Closed {
                remote_id: self.remote_id.clone(),
            });
        }
    }
}

impl PeerLink for FakeLink {
    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    fn role(&self) -> LinkRole {
        self.role
    }

    fn apply_signal(&self, signal: SignalPayload) -> BoxFuture<'_, Result<()>> {
        async move {
            self.applied.lock().unwrap().push(signal);
            Ok(())
        }
        .boxed()
    }

    fn is_stable(&self) -> bool {
        self.stable.load(Ordering::SeqCst)
    }

    fn replace_video_track(&self, track: Option<Arc<MediaTrack>>) -> BoxFuture<'_, Result<()>> {
        async move {
            self.replaced.fetch_add(1, Ordering::SeqCst);
            *self.current_video.lock().unwrap() = track.map(|t| t.id().to_string());
            Ok(())
        }
        .boxed()
    }

    fn inbound(&self) -> BoxFuture<'_, Vec<InboundTrack>> {
        async move { self.inbound.lock().unwrap().clone() }.boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            self.closed.store(true, Ordering::SeqCst);
        }
        .boxed()
    }
}

#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<HashMap<String, Arc<FakeLink>>>,
    connects: Mutex<HashMap<String, usize>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn link(&self, remote_id: &str) -> Option<Arc<FakeLink>> {
        self.links.lock().unwrap().get(remote_id).cloned()
    }

    pub fn connect_count(&self, remote_id: &str) -> usize {
        self.connects.lock().unwrap().get(remote_id).copied().unwrap_or(0)
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

impl PeerConnector for FakeConnector {
    fn connect(
        &self,
        remote_id: String,
        role: LinkRole,
        tracks: OutboundTracks,
        events: LinkEvents,
    ) -> BoxFuture<'_, Result<Arc<dyn PeerLink>>> {
        async move {
            *self.connects.lock().unwrap().entry(remote_id.clone()).or_default() += 1;
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let seeded = tracks.video.as_ref().map(|t| t.id().to_string());
            let link = FakeLink::build(&remote_id, role, seeded, Some(events.clone()));
            self.links.lock().unwrap().insert(remote_id.clone(), link.clone());

            if role == LinkRole::Initiator {
                let _ = events.send(LinkEvent::LocalSignal {
                    remote_id,
                    signal: SignalPayload::Offer {
                        sdp: "v=0".to_string(),
                    },
                });
            }
            Ok(link as Arc<dyn PeerLink>)
        }
        .boxed()
    }
}

/// Observations of one fake recording.
pub struct FakeRecording {
    sources: RecordingSources,
    stopped: AtomicBool,
    destroyed: AtomicBool,
}

impl FakeRecording {
    pub fn has_video(&self) -> bool {
        !self.sources.video.is_ended()
    }

    pub fn audio_inputs(&self) -> usize {
        self.sources.audio.inputs().len()
    }

    pub fn gains(&self) -> Vec<f32> {
        self.sources.audio.inputs().iter().map(|i| i.gain.get()).collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn is_mix_closed(&self) -> bool {
        self.sources.audio.is_closed()
    }

    pub fn capture_ended(&self) -> bool {
        self.sources.video.is_ended()
    }
}

struct FakeRecorder {
    recording: Arc<FakeRecording>,
}

impl Recorder for FakeRecorder {
    fn stop(&self) -> BoxFuture<'_, Result<RecordedFile>> {
        async move {
            if self.recording.stopped.swap(true, Ordering::SeqCst) {
                return Err(MeetError::RecorderFailed("already stopped".to_string()));
            }
            Ok(RecordedFile {
                path: PathBuf::from("/tmp/fake-recording.webm"),
                mime_type: "video/webm".to_string(),
                size: 1024,
            })
        }
        .boxed()
    }

    fn destroy(&self) {
        self.recording.destroyed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeRecorderFactory {
    recordings: Mutex<Vec<Arc<FakeRecording>>>,
    fail_next: AtomicBool,
}

impl FakeRecorderFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_start(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn last(&self) -> Option<Arc<FakeRecording>> {
        self.recordings.lock().unwrap().last().cloned()
    }
}

impl RecorderFactory for FakeRecorderFactory {
    fn start(&self, _room_id: &str, sources: RecordingSources) -> Result<Box<dyn Recorder>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(MeetError::RecorderUnavailable("fake".to_string()));
        }
        let recording = Arc::new(FakeRecording {
            sources,
            stopped: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        });
        self.recordings.lock().unwrap().push(recording.clone());
        Ok(Box::new(FakeRecorder { recording }))
    }
}

#[derive(Default)]
pub struct FakeStore {
    uploads: AtomicUsize,
    fail_uploads: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    finalized: Mutex<Vec<(String, String)>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }

    /// Uploads wait until the returned gate is notified.
    pub fn hold_uploads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn finalized(&self) -> Vec<(String, String)> {
        self.finalized.lock().unwrap().clone()
    }
}

impl RecordingStore for FakeStore {
    fn upload<'a>(&'a self, _file: &'a RecordedFile) -> BoxFuture<'a, Result<String>> {
        async move {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail_uploads.load(Ordering::SeqCst) {
                return Err(MeetError::UploadFailed("fake".to_string()));
            }
            Ok(format!("https://files/rec-{}", n))
        }
        .boxed()
    }

    fn finalize<'a>(&'a self, meeting_id: &'a str, record_url: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.finalized
                .lock()
                .unwrap()
                .push((meeting_id.to_string(), record_url.to_string()));
            Ok(())
        }
        .boxed()
    }
}

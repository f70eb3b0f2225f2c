use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::signaling::{ChannelEvent, SignalingChannel, SignalingClient};
use crate::config::Config;
use crate::error::Result;
use crate::media::{FileDevices, LocalMedia, MediaDevices, MediaStream, ScreenShare};
use crate::mesh::{MeshHandle, MeshManager, MeshView, PeerConnector, WebRtcConnector};
use crate::protocol::ClientEvent;
use crate::recording::{
    default_recorder_factory, HttpRecordingStore, RecorderFactory, RecordingCoordinator, RecordingNotice,
    RecordingServices, RecordingState, RecordingStore,
};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub room_id: String,
    pub display_name: String,
    pub want_video: bool,
    pub want_audio: bool,
}

impl SessionOptions {
    pub fn new(room_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            display_name: display_name.into(),
            want_video: true,
            want_audio: true,
        }
    }
}

/// Everything a session is built from
pub struct SessionServices {
    pub signaling: Arc<dyn SignalingChannel>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    pub devices: Arc<dyn MediaDevices>,
    pub connector: Arc<dyn PeerConnector>,
    pub recorders: Arc<dyn RecorderFactory>,
    pub store: Arc<dyn RecordingStore>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub ack_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub track_poll_interval: Duration,
}

impl SessionTimings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ack_timeout: config.signaling.ack_timeout,
            heartbeat_interval: config.recording.heartbeat_interval,
            track_poll_interval: config.media.track_poll_interval,
        }
    }
}

/// One participant in one room: local media, the peer mesh, screen share
/// and recording, driven by the signaling channel.
pub struct MeetingSession {
    room_id: String,
    signaling: Arc<dyn SignalingChannel>,
    client: Option<Arc<SignalingClient>>,
    local_media: Arc<LocalMedia>,
    screen_share: Arc<ScreenShare>,
    recording: Arc<RecordingCoordinator>,
    view: MeshView,
    shutdown: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl MeetingSession {
    /// Connect to the signaling server from `config` and join the room.
    pub async fn connect(
        config: &Config,
        options: SessionOptions,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RecordingNotice>)> {
        let (client, events) = SignalingClient::spawn(config.signaling.clone());
        let services = SessionServices {
            signaling: client.clone(),
            events,
            devices: Arc::new(FileDevices::from_config(&config.media)),
            connector: Arc::new(WebRtcConnector::new(&config.media)?),
            recorders: default_recorder_factory(&config.recording.output_dir)?,
            store: Arc::new(HttpRecordingStore::new(config.upload.clone())?),
        };

        Self::build(options, services, SessionTimings::from_config(config), Some(client)).await
    }

    /// Build a session over the given services. Local media is acquired
    /// before the room is joined.
    pub async fn start(
        options: SessionOptions,
        services: SessionServices,
        timings: SessionTimings,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RecordingNotice>)> {
        Self::build(options, services, timings, None).await
    }

    async fn build(
        options: SessionOptions,
        services: SessionServices,
        timings: SessionTimings,
        client: Option<Arc<SignalingClient>>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RecordingNotice>)> {
        let local_media = Arc::new(LocalMedia::new(services.devices.clone()));
        if options.want_video || options.want_audio {
            local_media.initialize(options.want_video, options.want_audio).await?;
        }

        let view = MeshView::new();
        let screen_share = ScreenShare::new(
            options.room_id.clone(),
            services.devices.clone(),
            services.signaling.clone(),
            local_media.clone(),
            view.clone(),
        );

        let (recording, notices) = RecordingCoordinator::new(
            options.room_id.clone(),
            RecordingServices {
                signaling: services.signaling.clone(),
                devices: services.devices.clone(),
                local_media: local_media.clone(),
                recorders: services.recorders,
                store: services.store,
            },
            timings.ack_timeout,
            timings.heartbeat_interval,
        );

        let (manager, link_events) = MeshManager::new(
            services.signaling.clone(),
            services.connector,
            local_media.clone(),
            screen_share.outbound_video(),
            timings.track_poll_interval,
            view.clone(),
        );
        let mesh = manager.spawn(link_events);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = tokio::spawn(dispatch(
            Dispatcher {
                room_id: options.room_id.clone(),
                display_name: options.display_name.clone(),
                signaling: services.signaling.clone(),
                screen_share: screen_share.clone(),
                recording: recording.clone(),
                mesh,
            },
            services.events,
            shutdown_rx,
        ));

        tracing::info!(room_id = %options.room_id, name = %options.display_name, "Meeting session started");

        Ok((
            Arc::new(Self {
                room_id: options.room_id,
                signaling: services.signaling,
                client,
                local_media,
                screen_share,
                recording,
                view,
                shutdown,
                dispatcher: Mutex::new(Some(dispatcher)),
            }),
            notices,
        ))
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn local_id(&self) -> Option<String> {
        self.signaling.local_id()
    }

    pub fn view(&self) -> MeshView {
        self.view.clone()
    }

    pub fn local_media(&self) -> Arc<LocalMedia> {
        self.local_media.clone()
    }

    pub async fn toggle_audio(&self) -> Result<bool> {
        self.local_media.toggle_audio().await
    }

    pub async fn toggle_video(&self) -> Result<bool> {
        self.local_media.toggle_video().await
    }

    pub async fn start_screen_share(&self) -> Result<MediaStream> {
        self.screen_share.start().await
    }

    pub async fn stop_screen_share(&self) {
        self.screen_share.stop().await
    }

    pub fn is_sharing(&self) -> bool {
        self.screen_share.is_sharing()
    }

    pub fn recording(&self) -> Arc<RecordingCoordinator> {
        self.recording.clone()
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recording.current_state()
    }

    pub async fn start_recording(&self) -> Result<()> {
        self.recording.start().await
    }

    pub async fn stop_recording(&self) -> Result<()> {
        self.recording.stop().await
    }

    /// Leave the room and release every local resource. Idempotent.
    pub async fn leave(&self) {
        let Some(dispatcher) = self.dispatcher.lock().await.take() else {
            return;
        };

        self.screen_share.stop().await;
        self.recording.teardown().await;
        self.signaling.emit(ClientEvent::LeaveRoom);

        self.shutdown.send_replace(true);
        if let Err(e) = dispatcher.await {
            tracing::warn!(error = %e, "Session dispatcher ended abnormally");
        }

        self.local_media.stop().await;
        if let Some(client) = &self.client {
            client.disconnect();
        }
        tracing::info!(room_id = %self.room_id, "Left meeting");
    }
}

struct Dispatcher {
    room_id: String,
    display_name: String,
    signaling: Arc<dyn SignalingChannel>,
    screen_share: Arc<ScreenShare>,
    recording: Arc<RecordingCoordinator>,
    mesh: MeshHandle,
}

/// Fans channel events out to the mesh and the recording coordinator.
async fn dispatch(
    ctx: Dispatcher,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.wait_for(|s| *s) => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if let ChannelEvent::Connected { identity } = &event {
            tracing::info!(identity = %identity, room_id = %ctx.room_id, "Joining room");
            ctx.signaling.emit(ClientEvent::JoinRoom {
                room_id: ctx.room_id.clone(),
                name: ctx.display_name.clone(),
            });
            ctx.screen_share.resend_status();
        }

        ctx.recording.handle_channel_event(&event);
        ctx.mesh.send(event);
    }

    ctx.mesh.shutdown().await;
}

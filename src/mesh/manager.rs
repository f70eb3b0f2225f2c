use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::link::{LinkEvent, LinkEvents, LinkReport, LinkRole, OutboundTracks, PeerConnector};
use super::registry::{MeshView, PeerRecord, PeerRegistry};
use super::remote::RemoteRenderer;
use crate::client::{ChannelEvent, SignalingChannel};
use crate::media::{LocalMedia, MediaTrack};
use crate::protocol::{ClientEvent, ServerEvent, SignalPayload};

/// Input for the mesh task
#[derive(Debug)]
pub enum MeshCommand {
    Channel(ChannelEvent),
    Shutdown,
}

/// Handle to a running mesh task.
pub struct MeshHandle {
    commands: mpsc::UnboundedSender<MeshCommand>,
    view: MeshView,
    task: JoinHandle<()>,
}

impl MeshHandle {
    pub fn send(&self, event: ChannelEvent) {
        if self.commands.send(MeshCommand::Channel(event)).is_err() {
            tracing::debug!("Mesh task has stopped, dropping event");
        }
    }

    pub fn view(&self) -> MeshView {
        self.view.clone()
    }

    /// Close every link and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(MeshCommand::Shutdown);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Mesh task ended abnormally");
        }
    }
}

/// Owns the peer records. Runs as a single task, so record creation and
/// teardown never interleave.
pub struct MeshManager {
    signaling: Arc<dyn SignalingChannel>,
    connector: Arc<dyn PeerConnector>,
    local_media: Arc<LocalMedia>,
    /// Screen track while sharing.
    outbound_video: watch::Receiver<Option<Arc<MediaTrack>>>,
    poll_interval: Duration,
    registry: PeerRegistry,
    view: MeshView,
    /// Peers that joined while we were sharing and have no record yet.
    resync_on_create: HashSet<String>,
    link_tx: mpsc::UnboundedSender<LinkReport>,
    next_link_id: u64,
}

impl MeshManager {
    pub fn new(
        signaling: Arc<dyn SignalingChannel>,
        connector: Arc<dyn PeerConnector>,
        local_media: Arc<LocalMedia>,
        outbound_video: watch::Receiver<Option<Arc<MediaTrack>>>,
        poll_interval: Duration,
        view: MeshView,
    ) -> (Self, mpsc::UnboundedReceiver<LinkReport>) {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        (
            Self {
                signaling,
                connector,
                local_media,
                outbound_video,
                poll_interval,
                registry: PeerRegistry::new(),
                view,
                resync_on_create: HashSet::new(),
                link_tx,
                next_link_id: 0,
            },
            link_rx,
        )
    }

    pub fn spawn(self, link_rx: mpsc::UnboundedReceiver<LinkReport>) -> MeshHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let view = self.view.clone();
        let task = tokio::spawn(self.run(command_rx, link_rx));
        MeshHandle {
            commands,
            view,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<MeshCommand>,
        mut link_events: mpsc::UnboundedReceiver<LinkReport>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(MeshCommand::Channel(event)) => self.handle_channel_event(event).await,
                    Some(MeshCommand::Shutdown) | None => break,
                },
                Some(report) = link_events.recv() => self.handle_link_report(report).await,
            }
        }

        self.teardown_all().await;
        tracing::info!("Mesh manager stopped");
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected { identity } => {
                tracing::debug!(identity = %identity, "Mesh ready for new identity");
            }
            ChannelEvent::Disconnected => {
                tracing::warn!(peers = self.registry.len(), "Signaling lost, tearing down mesh");
                self.teardown_all().await;
            }
            ChannelEvent::Server(event) => self.handle_server_event(event).await,
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::AllUsers(ids) => {
                let local_id = self.signaling.local_id();
                let remote: Vec<String> = ids
                    .into_iter()
                    .filter(|id| Some(id) != local_id.as_ref())
                    .collect();
                self.view.set_members(remote.iter().cloned()).await;

                for remote_id in remote {
                    if !self.registry.contains(&remote_id) {
                        self.create_record(&remote_id, LinkRole::Initiator).await;
                    }
                }
            }
            ServerEvent::UserJoined { id, name } => {
                tracing::info!(peer_id = %id, name = %name, "Peer joined");
                self.view.add_member(&id).await;

                if self.outbound_video.borrow().is_some() {
                    if self.registry.contains(&id) {
                        self.resync_video(&id).await;
                    } else {
                        self.resync_on_create.insert(id);
                    }
                }
            }
            ServerEvent::UserLeft(id) => {
                tracing::info!(peer_id = %id, "Peer left");
                self.view.remove_member(&id).await;
                self.resync_on_create.remove(&id);
                self.destroy_record(&id).await;
            }
            ServerEvent::Signal { from, signal } => {
                match SignalPayload::from_value(&signal) {
                    Ok(payload) => self.handle_signal(from, payload).await,
                    Err(e) => tracing::warn!(peer_id = %from, error = %e, "Dropping malformed signal"),
                }
            }
            ServerEvent::PeerScreenShareStatus { user_id, is_sharing } => {
                tracing::info!(peer_id = %user_id, is_sharing, "Peer screen share status");
                self.view.set_sharing(&user_id, is_sharing).await;
                if let Some(record) = self.registry.get(&user_id) {
                    record.renderer.refresh();
                }
            }
            ServerEvent::Me(_)
            | ServerEvent::RecordStarted { .. }
            | ServerEvent::RecordStopped { .. }
            | ServerEvent::Ack { .. } => {}
        }
    }

    async fn handle_signal(&mut self, from: String, payload: SignalPayload) {
        if let Some(record) = self.registry.get(&from) {
            if payload.is_answer() && record.link.is_stable() {
                tracing::debug!(peer_id = %from, "Dropping stale answer");
                return;
            }
            let link = record.link.clone();
            if let Err(e) = link.apply_signal(payload).await {
                tracing::warn!(peer_id = %from, error = %e, "Failed to apply signal");
            }
            return;
        }

        if !payload.is_offer() {
            tracing::debug!(peer_id = %from, kind = payload.kind(), "Dropping signal for unknown peer");
            return;
        }

        if self.create_record(&from, LinkRole::Responder).await {
            if let Some(record) = self.registry.get(&from) {
                let link = record.link.clone();
                if let Err(e) = link.apply_signal(payload).await {
                    tracing::warn!(peer_id = %from, error = %e, "Failed to answer offer");
                }
            }
        }
    }

    async fn handle_link_report(&mut self, report: LinkReport) {
        let remote_id = match &report.event {
            LinkEvent::LocalSignal { remote_id, .. }
            | LinkEvent::Track { remote_id, .. }
            | LinkEvent::Closed { remote_id } => remote_id,
        };
        let current = self.registry.get(remote_id).map(|record| record.link_id);
        if current != Some(report.link_id) {
            tracing::debug!(
                peer_id = %remote_id,
                link_id = report.link_id,
                current_link_id = ?current,
                "Dropping event from a torn-down link"
            );
            return;
        }

        match report.event {
            LinkEvent::LocalSignal { remote_id, signal } => {
                match signal.to_value() {
                    Ok(value) => self.signaling.emit(ClientEvent::Signal {
                        target_id: remote_id,
                        signal: value,
                    }),
                    Err(e) => tracing::error!(peer_id = %remote_id, error = %e, "Failed to encode signal"),
                }
            }
            LinkEvent::Track { remote_id, track } => {
                tracing::debug!(peer_id = %remote_id, track_id = %track.id, ended = track.ended, "Inbound track update");
                if let Some(record) = self.registry.get(&remote_id) {
                    record.renderer.refresh();
                }
            }
            LinkEvent::Closed { remote_id } => {
                tracing::info!(peer_id = %remote_id, "Peer connection closed");
                self.destroy_record(&remote_id).await;
            }
        }
    }

    async fn current_outbound_video(&self) -> Option<Arc<MediaTrack>> {
        let screen = self.outbound_video.borrow().clone();
        match screen {
            Some(screen) => Some(screen),
            None => self.local_media.camera_track().await,
        }
    }

    /// Returns whether a new record was inserted.
    async fn create_record(&mut self, remote_id: &str, role: LinkRole) -> bool {
        if self.registry.contains(remote_id) {
            return false;
        }

        let video = self.current_outbound_video().await;
        let seeded_video = video.as_ref().map(|t| t.id().to_string());
        let tracks = OutboundTracks {
            video,
            audio: self.local_media.microphone_track().await,
        };

        let link_id = self.next_link_id;
        self.next_link_id += 1;
        let events = LinkEvents::new(link_id, self.link_tx.clone());

        let link = match self
            .connector
            .connect(remote_id.to_string(), role, tracks, events)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                tracing::error!(peer_id = %remote_id, role = %role, error = %e, "Failed to create peer connection");
                return false;
            }
        };

        let record = PeerRecord {
            remote_id: remote_id.to_string(),
            role,
            link_id,
            link: link.clone(),
            seeded_video: seeded_video.clone(),
            renderer: RemoteRenderer::spawn(link.clone(), self.poll_interval),
        };
        if !self.registry.insert(record) {
            link.close().await;
            return false;
        }
        if let Some(record) = self.registry.get(remote_id) {
            self.view.add_record(record).await;
        }
        tracing::info!(peer_id = %remote_id, role = %role, peers = self.registry.len(), "Peer record created");

        // a share may have started or stopped while the link was being built
        let current = self.current_outbound_video().await;
        let current_id = current.as_ref().map(|t| t.id().to_string());
        let forced = self.resync_on_create.remove(remote_id);
        if forced || current_id != seeded_video {
            self.resync_video(remote_id).await;
        }
        true
    }

    async fn resync_video(&self, remote_id: &str) {
        let Some(record) = self.registry.get(remote_id) else {
            return;
        };
        let track = self.current_outbound_video().await;
        tracing::debug!(
            peer_id = %remote_id,
            track_id = ?track.as_ref().map(|t| t.id().to_string()),
            "Re-syncing outbound video"
        );
        if let Err(e) = record.link.replace_video_track(track).await {
            tracing::warn!(peer_id = %remote_id, error = %e, "Failed to re-sync outbound video");
        }
    }

    async fn destroy_record(&mut self, remote_id: &str) {
        let Some(record) = self.registry.remove(remote_id) else {
            return;
        };
        self.view.remove_record(remote_id).await;
        record.renderer.stop();
        record.link.close().await;
        tracing::info!(peer_id = %remote_id, peers = self.registry.len(), "Peer record destroyed");
    }

    async fn teardown_all(&mut self) {
        for record in self.registry.drain() {
            record.renderer.stop();
            record.link.close().await;
        }
        self.resync_on_create.clear();
        self.view.clear().await;
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use rand::RngCore;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use super::lock::{AcquireOutcome, RecordingLocks};
use super::room::RoomRegistry;
use crate::config::LockConfig;
use crate::protocol::{AckResponse, ClientEvent, ClientFrame, ServerEvent};

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Rendezvous hub: issues session identities, tracks room membership, relays
/// signaling payloads and arbitrates the per-room recording lock.
pub struct SignalingHub {
    sessions: Arc<RwLock<HashMap<String, EventSender>>>,
    rooms: Arc<RoomRegistry>,
    locks: Arc<RecordingLocks>,
}

impl SignalingHub {
    pub fn new(lock_config: &LockConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            rooms: RoomRegistry::new(),
            locks: RecordingLocks::new(lock_config.lease()),
        }
    }

    fn generate_session_id() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Sweep expired recording leases in the background.
    pub fn start_lease_sweeper(self: Arc<Self>) {
        let Some(lease) = self.locks.lease() else {
            tracing::info!("Recording lock lease disabled, releases only on stop or disconnect");
            return;
        };
        let period = (lease / 3).max(std::time::Duration::from_millis(100));
        let hub = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                for (room_id, session_id) in hub.locks.expire(Instant::now()).await {
                    hub.broadcast_room(
                        &room_id,
                        ServerEvent::RecordStopped { user_id: session_id },
                        None,
                    )
                    .await;
                }
            }
        });
    }

    /// Register a new connection and tell it its identity.
    pub async fn connect(&self, sender: EventSender) -> String {
        let session_id = Self::generate_session_id();

        if sender.send(ServerEvent::Me(session_id.clone())).is_err() {
            tracing::warn!(session_id = %session_id, "Connection closed before identity was sent");
        }

        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.clone(), sender);
        tracing::info!(session_id = %session_id, sessions = sessions.len(), "Session connected");
        session_id
    }

    pub async fn handle_frame(&self, session_id: &str, frame: ClientFrame) {
        let ClientFrame { event, ack } = frame;

        match event {
            ClientEvent::JoinRoom { room_id, name } => {
                self.join_room(session_id, &room_id, &name).await;
            }
            ClientEvent::Signal { target_id, signal } => {
                self.relay_signal(session_id, &target_id, signal).await;
            }
            ClientEvent::LeaveRoom => {
                self.leave_room(session_id).await;
            }
            ClientEvent::ScreenShareStatus {
                room_id,
                is_sharing,
                user_id,
            } => {
                if user_id != session_id {
                    tracing::warn!(
                        session_id = %session_id,
                        claimed = %user_id,
                        "Screen share status names another user, using the session identity"
                    );
                }
                self.screen_share_status(session_id, &room_id, is_sharing).await;
            }
            ClientEvent::RequestStartRecord(room_id) => {
                let response = self.request_start_record(session_id, &room_id).await;
                match ack {
                    Some(id) => self.send_to(session_id, ServerEvent::Ack { id, response }).await,
                    None => tracing::debug!(session_id = %session_id, "Start record request without ack"),
                }
            }
            ClientEvent::RequestStopRecord(room_id) => {
                self.request_stop_record(session_id, &room_id).await;
            }
            ClientEvent::RecordHeartbeat(room_id) => {
                if !self.locks.renew(&room_id, session_id).await {
                    tracing::debug!(
                        session_id = %session_id,
                        room_id = %room_id,
                        "Heartbeat from a session that does not hold the lock"
                    );
                }
            }
        }
    }

    /// Drop all state for a closed connection.
    pub async fn disconnect(&self, session_id: &str) {
        {
            let mut sessions = self.sessions.write().await;
            sessions.remove(session_id);
        }

        for room_id in self.locks.release_all_for(session_id).await {
            self.broadcast_room(
                &room_id,
                ServerEvent::RecordStopped {
                    user_id: session_id.to_string(),
                },
                Some(session_id),
            )
            .await;
        }

        self.leave_room(session_id).await;
        tracing::info!(session_id = %session_id, "Session disconnected");
    }

    async fn join_room(&self, session_id: &str, room_id: &str, name: &str) {
        let outcome = self.rooms.join(room_id, session_id, name).await;

        if let Some(left) = outcome.left {
            self.notify_left(session_id, &left.room_id, &left.remaining).await;
        }

        let existing_ids: Vec<String> = outcome.existing.iter().map(|m| m.id.clone()).collect();
        self.send_to(session_id, ServerEvent::AllUsers(existing_ids.clone()))
            .await;

        for member in outcome.existing.iter().filter(|m| m.sharing) {
            self.send_to(
                session_id,
                ServerEvent::PeerScreenShareStatus {
                    user_id: member.id.clone(),
                    is_sharing: true,
                },
            )
            .await;
        }

        if let Some(holder) = self.locks.holder(room_id).await {
            self.send_to(session_id, ServerEvent::RecordStarted { user_id: holder })
                .await;
        }

        let joined = ServerEvent::UserJoined {
            id: session_id.to_string(),
            name: name.to_string(),
        };
        for member_id in &existing_ids {
            self.send_to(member_id, joined.clone()).await;
        }
    }

    async fn leave_room(&self, session_id: &str) {
        if let Some(left) = self.rooms.leave(session_id).await {
            self.notify_left(session_id, &left.room_id, &left.remaining).await;
        }
    }

    async fn notify_left(&self, session_id: &str, room_id: &str, remaining: &[String]) {
        if self.locks.release(room_id, session_id).await {
            for member_id in remaining {
                self.send_to(
                    member_id,
                    ServerEvent::RecordStopped {
                        user_id: session_id.to_string(),
                    },
                )
                .await;
            }
        }

        for member_id in remaining {
            self.send_to(member_id, ServerEvent::UserLeft(session_id.to_string()))
                .await;
        }
    }

    async fn relay_signal(&self, session_id: &str, target_id: &str, signal: Value) {
        let sessions = self.sessions.read().await;
        match sessions.get(target_id) {
            Some(target) => {
                let event = ServerEvent::Signal {
                    from: session_id.to_string(),
                    signal,
                };
                if target.send(event).is_err() {
                    tracing::debug!(target_id = %target_id, "Signal target connection is closing");
                }
            }
            None => {
                tracing::debug!(
                    session_id = %session_id,
                    target_id = %target_id,
                    "Dropping signal for unknown target"
                );
            }
        }
    }

    async fn screen_share_status(&self, session_id: &str, room_id: &str, is_sharing: bool) {
        if !self.rooms.set_sharing(room_id, session_id, is_sharing).await {
            tracing::warn!(
                session_id = %session_id,
                room_id = %room_id,
                "Screen share status for a room the session is not in"
            );
            return;
        }

        self.broadcast_room(
            room_id,
            ServerEvent::PeerScreenShareStatus {
                user_id: session_id.to_string(),
                is_sharing,
            },
            Some(session_id),
        )
        .await;
    }

    async fn request_start_record(&self, session_id: &str, room_id: &str) -> AckResponse {
        if self.rooms.room_of(session_id).await.as_deref() != Some(room_id) {
            return AckResponse::denied("Not a member of this room");
        }

        match self.locks.try_acquire(room_id, session_id).await {
            AcquireOutcome::Granted => {
                self.broadcast_room(
                    room_id,
                    ServerEvent::RecordStarted {
                        user_id: session_id.to_string(),
                    },
                    None,
                )
                .await;
                AckResponse::granted().with_lease(self.locks.lease())
            }
            AcquireOutcome::AlreadyHeld => AckResponse::granted().with_lease(self.locks.lease()),
            AcquireOutcome::Denied { holder } => {
                tracing::info!(
                    room_id = %room_id,
                    session_id = %session_id,
                    holder = %holder,
                    "Recording start denied"
                );
                AckResponse::denied(format!("Recording already in progress by {}", holder))
            }
        }
    }

    async fn request_stop_record(&self, session_id: &str, room_id: &str) {
        if self.locks.release(room_id, session_id).await {
            self.broadcast_room(
                room_id,
                ServerEvent::RecordStopped {
                    user_id: session_id.to_string(),
                },
                None,
            )
            .await;
        }
    }

    async fn send_to(&self, session_id: &str, event: ServerEvent) {
        let sessions = self.sessions.read().await;
        if let Some(sender) = sessions.get(session_id) {
            if sender.send(event).is_err() {
                tracing::debug!(session_id = %session_id, "Dropping event for closing connection");
            }
        }
    }

    async fn broadcast_room(&self, room_id: &str, event: ServerEvent, except: Option<&str>) {
        let members = self.rooms.member_ids(room_id).await;
        for member_id in members.iter().filter(|id| Some(id.as_str()) != except) {
            self.send_to(member_id, event.clone()).await;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.room_count().await
    }

    pub async fn recording_holder(&self, room_id: &str) -> Option<String> {
        self.locks.holder(room_id).await
    }
}

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use super::link::{LinkRole, PeerLink};
use super::remote::{RemoteRenderer, RemoteStream};

/// One connection per remote identity.
pub struct PeerRecord {
    pub remote_id: String,
    pub role: LinkRole,
    /// Matches the `link_id` on every report from `link`.
    pub link_id: u64,
    pub link: Arc<dyn PeerLink>,
    /// Outbound video id the link was created with.
    pub seeded_video: Option<String>,
    pub renderer: RemoteRenderer,
}

/// Record arena. Only the mesh task holds it mutably.
#[derive(Default)]
pub struct PeerRegistry {
    records: HashMap<String, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, remote_id: &str) -> bool {
        self.records.contains_key(remote_id)
    }

    pub fn get(&self, remote_id: &str) -> Option<&PeerRecord> {
        self.records.get(remote_id)
    }

    /// First writer wins: an existing record is never replaced.
    pub fn insert(&mut self, record: PeerRecord) -> bool {
        if self.records.contains_key(&record.remote_id) {
            tracing::warn!(peer_id = %record.remote_id, "Duplicate peer record suppressed");
            return false;
        }
        self.records.insert(record.remote_id.clone(), record);
        true
    }

    pub fn remove(&mut self, remote_id: &str) -> Option<PeerRecord> {
        self.records.remove(remote_id)
    }

    pub fn drain(&mut self) -> Vec<PeerRecord> {
        self.records.drain().map(|(_, record)| record).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Default)]
struct ViewState {
    links: HashMap<String, Arc<dyn PeerLink>>,
    streams: HashMap<String, watch::Receiver<Option<RemoteStream>>>,
    members: BTreeSet<String>,
    sharing: HashSet<String>,
}

/// Read-only window onto the mesh, updated by the mesh task.
#[derive(Clone, Default)]
pub struct MeshView {
    state: Arc<RwLock<ViewState>>,
}

impl MeshView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn links(&self) -> Vec<Arc<dyn PeerLink>> {
        self.state.read().await.links.values().cloned().collect()
    }

    pub async fn link(&self, remote_id: &str) -> Option<Arc<dyn PeerLink>> {
        self.state.read().await.links.get(remote_id).cloned()
    }

    pub async fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.links.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remote identities in the room, as last reported by the server.
    pub async fn members(&self) -> Vec<String> {
        self.state.read().await.members.iter().cloned().collect()
    }

    pub async fn remote_stream(&self, remote_id: &str) -> Option<watch::Receiver<Option<RemoteStream>>> {
        self.state.read().await.streams.get(remote_id).cloned()
    }

    pub async fn is_sharing(&self, remote_id: &str) -> bool {
        self.state.read().await.sharing.contains(remote_id)
    }

    pub async fn sharing_peers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.sharing.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) async fn add_record(&self, record: &PeerRecord) {
        let mut state = self.state.write().await;
        state.links.insert(record.remote_id.clone(), record.link.clone());
        state.streams.insert(record.remote_id.clone(), record.renderer.stream());
    }

    pub(crate) async fn remove_record(&self, remote_id: &str) {
        let mut state = self.state.write().await;
        state.links.remove(remote_id);
        state.streams.remove(remote_id);
    }

    pub(crate) async fn set_members(&self, members: impl IntoIterator<Item = String>) {
        let mut state = self.state.write().await;
        state.members = members.into_iter().collect();
    }

    pub(crate) async fn add_member(&self, remote_id: &str) {
        self.state.write().await.members.insert(remote_id.to_string());
    }

    pub(crate) async fn remove_member(&self, remote_id: &str) {
        let mut state = self.state.write().await;
        state.members.remove(remote_id);
        state.sharing.remove(remote_id);
    }

    pub(crate) async fn set_sharing(&self, remote_id: &str, sharing: bool) {
        let mut state = self.state.write().await;
        if sharing {
            state.sharing.insert(remote_id.to_string());
        } else {
            state.sharing.remove(remote_id);
        }
    }

    pub(crate) async fn clear(&self) {
        *self.state.write().await = ViewState::default();
    }
}

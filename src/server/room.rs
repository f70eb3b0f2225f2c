use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub name: String,
    pub sharing: bool,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    /// Join order is kept so snapshots are stable.
    pub members: Vec<Member>,
    pub created_at: std::time::SystemTime,
}

/// Outcome of a join: who was already there, and which room was left on the way.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub existing: Vec<Member>,
    pub left: Option<LeaveOutcome>,
}

#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub room_id: String,
    pub remaining: Vec<String>,
}

/// Server-side room membership. The set of members per room is authoritative
/// for every connected client.
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
    /// session id -> room id
    sessions: Arc<RwLock<HashMap<String, String>>>,
}

impl RoomRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Add a session to a room, creating the room on first join. A session
    /// that is already in another room leaves it first.
    pub async fn join(&self, room_id: &str, session_id: &str, name: &str) -> JoinOutcome {
        let mut rooms = self.rooms.write().await;
        let mut sessions = self.sessions.write().await;

        let left = match sessions.get(session_id).cloned() {
            Some(current) if current == room_id => {
                let existing = rooms
                    .get(room_id)
                    .map(|room| {
                        room.members
                            .iter()
                            .filter(|m| m.id != session_id)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                tracing::debug!(session_id = %session_id, room_id = %room_id, "Session re-joined its room");
                return JoinOutcome { existing, left: None };
            }
            Some(previous) => {
                sessions.remove(session_id);
                Self::remove_member(&mut rooms, &previous, session_id)
            }
            None => None,
        };

        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            tracing::info!(room_id = %room_id, "Room created");
            Room {
                id: room_id.to_string(),
                members: Vec::new(),
                created_at: std::time::SystemTime::now(),
            }
        });

        let existing = room.members.clone();
        room.members.push(Member {
            id: session_id.to_string(),
            name: name.to_string(),
            sharing: false,
        });
        sessions.insert(session_id.to_string(), room_id.to_string());

        tracing::info!(
            session_id = %session_id,
            room_id = %room_id,
            members = room.members.len(),
            "Session joined room"
        );

        JoinOutcome { existing, left }
    }

    /// Remove a session from its room. Empty rooms are dropped.
    pub async fn leave(&self, session_id: &str) -> Option<LeaveOutcome> {
        let mut rooms = self.rooms.write().await;
        let mut sessions = self.sessions.write().await;

        let room_id = sessions.remove(session_id)?;
        Self::remove_member(&mut rooms, &room_id, session_id)
    }

    fn remove_member(
        rooms: &mut HashMap<String, Room>,
        room_id: &str,
        session_id: &str,
    ) -> Option<LeaveOutcome> {
        let room = rooms.get_mut(room_id)?;
        room.members.retain(|m| m.id != session_id);
        let remaining: Vec<String> = room.members.iter().map(|m| m.id.clone()).collect();

        tracing::info!(session_id = %session_id, room_id = %room_id, "Session left room");

        if remaining.is_empty() {
            rooms.remove(room_id);
            tracing::info!(room_id = %room_id, "Room closed");
        }

        Some(LeaveOutcome {
            room_id: room_id.to_string(),
            remaining,
        })
    }

    pub async fn room_of(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    pub async fn member_ids(&self, room_id: &str) -> Vec<String> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|r| r.members.iter().map(|m| m.id.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn room_exists(&self, room_id: &str) -> bool {
        let rooms = self.rooms.read().await;
        rooms.contains_key(room_id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Record a member's screen-share flag. Returns false when the session is
    /// not a member of `room_id`.
    pub async fn set_sharing(&self, room_id: &str, session_id: &str, sharing: bool) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms
            .get_mut(room_id)
            .and_then(|r| r.members.iter_mut().find(|m| m.id == session_id))
        {
            Some(member) => {
                member.sharing = sharing;
                true
            }
            None => false,
        }
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct LockHolder {
    pub session_id: String,
    pub granted_at: Instant,
    pub renewed_at: Instant,
}

/// Result of a start request against the room's recording lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted,
    /// The requester already holds the lock.
    AlreadyHeld,
    Denied { holder: String },
}

/// Per-room recording lock. At most one session holds the lock of a room.
pub struct RecordingLocks {
    holders: Arc<RwLock<HashMap<String, LockHolder>>>,
    lease: Option<Duration>,
}

impl RecordingLocks {
    pub fn new(lease: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            holders: Arc::new(RwLock::new(HashMap::new())),
            lease,
        })
    }

    pub fn lease(&self) -> Option<Duration> {
        self.lease
    }

    pub async fn try_acquire(&self, room_id: &str, session_id: &str) -> AcquireOutcome {
        let mut holders = self.holders.write().await;

        if let Some(holder) = holders.get(room_id) {
            if holder.session_id == session_id {
                return AcquireOutcome::AlreadyHeld;
            }
            return AcquireOutcome::Denied {
                holder: holder.session_id.clone(),
            };
        }

        let now = Instant::now();
        holders.insert(
            room_id.to_string(),
            LockHolder {
                session_id: session_id.to_string(),
                granted_at: now,
                renewed_at: now,
            },
        );
        tracing::info!(room_id = %room_id, session_id = %session_id, "Recording lock granted");
        AcquireOutcome::Granted
    }

    /// Release the lock if `session_id` holds it.
    pub async fn release(&self, room_id: &str, session_id: &str) -> bool {
        let mut holders = self.holders.write().await;
        match holders.get(room_id) {
            Some(holder) if holder.session_id == session_id => {
                holders.remove(room_id);
                tracing::info!(room_id = %room_id, session_id = %session_id, "Recording lock released");
                true
            }
            Some(holder) => {
                tracing::warn!(
                    room_id = %room_id,
                    session_id = %session_id,
                    holder = %holder.session_id,
                    "Ignoring release from non-holder"
                );
                false
            }
            None => false,
        }
    }

    /// Release every lock held by a session; returns the affected rooms.
    pub async fn release_all_for(&self, session_id: &str) -> Vec<String> {
        let mut holders = self.holders.write().await;
        let rooms: Vec<String> = holders
            .iter()
            .filter(|(_, h)| h.session_id == session_id)
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in &rooms {
            holders.remove(room_id);
            tracing::info!(room_id = %room_id, session_id = %session_id, "Recording lock released on disconnect");
        }
        rooms
    }

    pub async fn renew(&self, room_id: &str, session_id: &str) -> bool {
        let mut holders = self.holders.write().await;
        match holders.get_mut(room_id) {
            Some(holder) if holder.session_id == session_id => {
                holder.renewed_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    pub async fn holder(&self, room_id: &str) -> Option<String> {
        let holders = self.holders.read().await;
        holders.get(room_id).map(|h| h.session_id.clone())
    }

    /// Drop holders whose lease ran out. Returns (room_id, session_id) pairs.
    pub async fn expire(&self, now: Instant) -> Vec<(String, String)> {
        let Some(lease) = self.lease else {
            return Vec::new();
        };

        let mut holders = self.holders.write().await;
        let expired: Vec<(String, String)> = holders
            .iter()
            .filter(|(_, h)| now.saturating_duration_since(h.renewed_at) >= lease)
            .map(|(room_id, h)| (room_id.clone(), h.session_id.clone()))
            .collect();

        for (room_id, session_id) in &expired {
            holders.remove(room_id);
            tracing::warn!(room_id = %room_id, session_id = %session_id, "Recording lock lease expired");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_holder_per_room() {
        let locks = RecordingLocks::new(None);

        assert_eq!(locks.try_acquire("X", "a").await, AcquireOutcome::Granted);
        assert_eq!(
            locks.try_acquire("X", "b").await,
            AcquireOutcome::Denied { holder: "a".to_string() }
        );
        assert_eq!(locks.try_acquire("X", "a").await, AcquireOutcome::AlreadyHeld);
        assert_eq!(locks.try_acquire("Y", "b").await, AcquireOutcome::Granted);
    }

    #[tokio::test]
    async fn test_concurrent_requests_grant_exactly_one() {
        let locks = RecordingLocks::new(None);
        let (first, second) = tokio::join!(locks.try_acquire("X", "a"), locks.try_acquire("X", "b"));

        let granted = [&first, &second]
            .iter()
            .filter(|o| ***o == AcquireOutcome::Granted)
            .count();
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn test_only_holder_releases() {
        let locks = RecordingLocks::new(None);
        locks.try_acquire("X", "a").await;

        assert!(!locks.release("X", "b").await);
        assert_eq!(locks.holder("X").await.as_deref(), Some("a"));
        assert!(locks.release("X", "a").await);
        assert_eq!(locks.holder("X").await, None);
        assert!(!locks.release("X", "a").await);
    }

    #[tokio::test]
    async fn test_release_all_for_session() {
        let locks = RecordingLocks::new(None);
        locks.try_acquire("X", "a").await;
        locks.try_acquire("Y", "a").await;
        locks.try_acquire("Z", "b").await;

        let mut released = locks.release_all_for("a").await;
        released.sort();
        assert_eq!(released, vec!["X", "Y"]);
        assert_eq!(locks.holder("Z").await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_lease_expiry_and_renewal() {
        let locks = RecordingLocks::new(Some(Duration::from_secs(30)));
        locks.try_acquire("X", "a").await;

        assert!(locks.expire(Instant::now()).await.is_empty());

        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(
            locks.expire(later).await,
            vec![("X".to_string(), "a".to_string())]
        );
        assert_eq!(locks.holder("X").await, None);

        locks.try_acquire("X", "b").await;
        assert!(locks.renew("X", "b").await);
        assert!(!locks.renew("X", "a").await);
    }

    #[tokio::test]
    async fn test_no_lease_never_expires() {
        let locks = RecordingLocks::new(None);
        locks.try_acquire("X", "a").await;
        let later = Instant::now() + Duration::from_secs(3600);
        assert!(locks.expire(later).await.is_empty());
    }
}

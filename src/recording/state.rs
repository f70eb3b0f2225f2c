use serde::{Deserialize, Serialize};

/// Recording state of the room as seen from this client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    Idle,
    /// This client holds the lock and is capturing.
    RecordingLocal,
    /// Another identity holds the lock.
    RecordingRemote { holder: String },
    /// Lock released, the file is being uploaded.
    Uploading,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

impl RecordingState {
    /// The start affordance is only enabled while idle.
    pub fn can_start(&self) -> bool {
        matches!(self, RecordingState::Idle)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, RecordingState::RecordingLocal)
    }

    pub fn remote_holder(&self) -> Option<&str> {
        match self {
            RecordingState::RecordingRemote { holder } => Some(holder),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = RecordingState::default();
        assert_eq!(state, RecordingState::Idle);
        assert!(state.can_start());
    }

    #[test]
    fn test_start_disabled_outside_idle() {
        assert!(!RecordingState::RecordingLocal.can_start());
        assert!(!RecordingState::Uploading.can_start());

        let remote = RecordingState::RecordingRemote {
            holder: "a".to_string(),
        };
        assert!(!remote.can_start());
        assert_eq!(remote.remote_holder(), Some("a"));
        assert_eq!(RecordingState::RecordingLocal.remote_holder(), None);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&RecordingState::RecordingLocal).unwrap();
        assert_eq!(json, "\"RecordingLocal\"");

        let remote = RecordingState::RecordingRemote {
            holder: "abc".to_string(),
        };
        let json = serde_json::to_string(&remote).unwrap();
        assert!(json.contains("RecordingRemote"));
        assert!(json.contains("abc"));

        let back: RecordingState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, remote);
    }
}

use thiserror::Error;

/// Error types for the meeting mesh
#[derive(Debug, Error)]
pub enum MeetError {
    /// Media acquisition errors
    #[error("Permission denied for {0}")]
    PermissionDenied(String),

    #[error("Media device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Local media has not been initialized")]
    MediaNotInitialized,

    /// WebRTC related errors
    #[error("Failed to create peer connection: {0}")]
    PeerConnectionCreation(String),

    #[error("Failed to create offer: {0}")]
    CreateOfferFailed(String),

    #[error("Failed to create answer: {0}")]
    CreateAnswerFailed(String),

    #[error("Invalid SDP format: {0}")]
    InvalidSdp(String),

    #[error("Failed to set local description: {0}")]
    SetLocalDescriptionFailed(String),

    #[error("Failed to set remote description: {0}")]
    SetRemoteDescriptionFailed(String),

    #[error("Failed to add ICE candidate: {0}")]
    AddIceCandidateFailed(String),

    #[error("Failed to add track: {0}")]
    AddTrackFailed(String),

    #[error("Failed to replace track for peer {0}")]
    ReplaceTrackFailed(String),

    #[error("WebRTC API error: {0}")]
    WebRtcApi(String),

    /// Signaling errors
    #[error("Signaling channel is not connected")]
    NotConnected,

    #[error("Signaling connection lost")]
    ConnectionLost,

    #[error("Invalid signaling message: {0}")]
    InvalidSignalingMessage(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Recording errors
    #[error("Recording lock denied: {0}")]
    RecordingLockDenied(String),

    #[error("A recording is already in progress")]
    RecordingInProgress,

    #[error("Recorder unavailable: {0}")]
    RecorderUnavailable(String),

    #[error("Recorder failed: {0}")]
    RecorderFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Failed to finalize recording: {0}")]
    FinalizeFailed(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using MeetError
pub type Result<T> = std::result::Result<T, MeetError>;

impl MeetError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        MeetError::Internal(msg.into())
    }

    /// Helper to create WebRTC API errors
    pub fn webrtc_api(msg: impl Into<String>) -> Self {
        MeetError::WebRtcApi(msg.into())
    }

    pub fn websocket(msg: impl Into<String>) -> Self {
        MeetError::WebSocket(msg.into())
    }

    /// Permission errors are terminal for the requested operation.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, MeetError::PermissionDenied(_))
    }
}

impl From<webrtc::Error> for MeetError {
    fn from(err: webrtc::Error) -> Self {
        MeetError::WebRtcApi(err.to_string())
    }
}

impl From<reqwest::Error> for MeetError {
    fn from(err: reqwest::Error) -> Self {
        MeetError::UploadFailed(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MeetError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MeetError::WebSocket(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeetError::ReplaceTrackFailed("abc".to_string());
        assert_eq!(err.to_string(), "Failed to replace track for peer abc");

        let err = MeetError::RecordingLockDenied("held by xyz".to_string());
        assert_eq!(err.to_string(), "Recording lock denied: held by xyz");
    }

    #[test]
    fn test_error_helpers() {
        let err = MeetError::internal("Something went wrong");
        assert!(matches!(err, MeetError::Internal(_)));

        let err = MeetError::PermissionDenied("display capture".into());
        assert!(err.is_permission_denied());
        assert!(!MeetError::NotConnected.is_permission_denied());
    }
}

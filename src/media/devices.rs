use futures::future::BoxFuture;

use super::track::MediaStream;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl MediaConstraints {
    pub fn new(video: bool, audio: bool) -> Self {
        Self { video, audio }
    }

    pub fn video_only() -> Self {
        Self::new(true, false)
    }
}

/// Capture backends. Denied access surfaces as `MeetError::PermissionDenied`.
pub trait MediaDevices: Send + Sync {
    /// Camera and microphone.
    fn get_user_media(&self, constraints: MediaConstraints) -> BoxFuture<'_, Result<MediaStream>>;

    /// Display capture. With `audio` set the stream also carries system
    /// audio when the source offers it.
    fn get_display_media(&self, constraints: MediaConstraints)
        -> BoxFuture<'_, Result<MediaStream>>;
}

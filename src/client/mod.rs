pub mod session;
pub mod signaling;

pub use session::{MeetingSession, SessionOptions, SessionServices, SessionTimings};
pub use signaling::{Backoff, ChannelEvent, SignalingChannel, SignalingClient};

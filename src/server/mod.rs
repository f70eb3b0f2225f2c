pub mod hub;
pub mod lock;
pub mod room;

pub use hub::{EventSender, SignalingHub};
pub use lock::{AcquireOutcome, RecordingLocks};
pub use room::{Member, RoomRegistry};

pub mod devices;
pub mod file_source;
pub mod local;
pub mod screen_share;
pub mod track;

pub use devices::{MediaConstraints, MediaDevices};
pub use file_source::{EndOfFile, FileDevices};
pub use local::LocalMedia;
pub use screen_share::ScreenShare;
pub use track::{MediaStream, MediaTrack, TrackKind};

//! Full mesh of peer links, one per remote identity in the room.

pub mod link;
pub mod manager;
pub mod registry;
pub mod remote;
pub mod webrtc_link;

pub use link::{
    InboundTrack, LinkEvent, LinkEvents, LinkReport, LinkRole, OutboundTracks, PeerConnector, PeerLink,
};
pub use manager::{MeshCommand, MeshHandle, MeshManager};
pub use registry::{MeshView, PeerRecord, PeerRegistry};
pub use remote::{RemoteRenderer, RemoteStream};
pub use webrtc_link::{create_webrtc_api, get_ice_servers, WebRtcConnector, WebRtcLink};

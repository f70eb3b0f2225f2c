use std::fmt;
use std::sync::Arc;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::media::{MediaTrack, TrackKind};
use crate::protocol::SignalPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Creates the offer.
    Initiator,
    /// Answers an offer.
    Responder,
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkRole::Initiator => write!(f, "initiator"),
            LinkRole::Responder => write!(f, "responder"),
        }
    }
}

/// Tracks a link is seeded with at creation.
#[derive(Debug, Clone, Default)]
pub struct OutboundTracks {
    pub video: Option<Arc<MediaTrack>>,
    pub audio: Option<Arc<MediaTrack>>,
}

/// Descriptor of a track received from the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,
    pub ended: bool,
}

/// Reported by links to the mesh task
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Offer, answer or ICE candidate to forward to the remote identity.
    LocalSignal {
        remote_id: String,
        signal: SignalPayload,
    },
    /// An inbound track appeared or ended.
    Track {
        remote_id: String,
        track: InboundTrack,
    },
    /// The connection failed or was closed.
    Closed { remote_id: String },
}

/// A link event tagged with the id of the link that produced it.
#[derive(Debug, Clone)]
pub struct LinkReport {
    pub link_id: u64,
    pub event: LinkEvent,
}

/// Event sender handed to a single link. The mesh drops reports from links
/// that no longer back the current record for their identity.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    link_id: u64,
    tx: mpsc::UnboundedSender<LinkReport>,
}

impl LinkEvents {
    pub fn new(link_id: u64, tx: mpsc::UnboundedSender<LinkReport>) -> Self {
        Self { link_id, tx }
    }

    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// False once the mesh has stopped listening.
    pub fn send(&self, event: LinkEvent) -> bool {
        self.tx
            .send(LinkReport {
                link_id: self.link_id,
                event,
            })
            .is_ok()
    }
}

/// One peer-to-peer connection to a remote identity.
pub trait PeerLink: Send + Sync {
    fn remote_id(&self) -> &str;

    fn role(&self) -> LinkRole;

    /// Feed a negotiation payload received from the remote identity.
    fn apply_signal(&self, signal: SignalPayload) -> BoxFuture<'_, Result<()>>;

    /// No offer/answer exchange is in progress.
    fn is_stable(&self) -> bool;

    /// Swap the outbound video without renegotiation.
    fn replace_video_track(&self, track: Option<Arc<MediaTrack>>) -> BoxFuture<'_, Result<()>>;

    /// Current inbound tracks, one per receiver.
    fn inbound(&self) -> BoxFuture<'_, Vec<InboundTrack>>;

    /// Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Creates links. An initiator link sends its offer through `events` before
/// `connect` resolves.
pub trait PeerConnector: Send + Sync {
    fn connect(
        &self,
        remote_id: String,
        role: LinkRole,
        tracks: OutboundTracks,
        events: LinkEvents,
    ) -> BoxFuture<'_, Result<Arc<dyn PeerLink>>>;
}

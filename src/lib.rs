//! Peer-to-peer meeting rooms: a rendezvous signaling server, and a client
//! that keeps a full mesh of WebRTC links, swaps in screen shares and
//! coordinates a single recorder per room.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod media;
pub mod mesh;
pub mod protocol;
pub mod recording;
pub mod server;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{MeetError, Result};

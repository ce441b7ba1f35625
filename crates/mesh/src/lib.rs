//! Multi-peer WebRTC mesh negotiation for video meetings
//!
//! This crate creates, negotiates, repairs and tears down one peer-to-peer
//! connection per remote participant of a meeting room. Offer/answer
//! collisions are resolved with the "perfect negotiation" pattern, so no
//! central negotiation authority is needed.
//!
//! # Features
//!
//! - **Perfect negotiation**: deterministic polite/impolite roles, rollback on glare
//! - **Single-flight rounds**: coalesced negotiation triggers per peer
//! - **Bounded mesh**: configurable peer limit (default 12) with roster reconciliation
//! - **ICE-restart recovery**: bounded retries with exponential backoff
//! - **Local media fan-out**: one outbound track per kind per peer, mute without renegotiation
//! - **WebSocket signaling**: JSON `{event, data}` frames
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  Signaling server (WebSocket)                         │
//! │  ↕ meeting:* events                                   │
//! │  MeshSession                                          │
//! │  ├─ SignalingHandle (room-scoped, explicit)           │
//! │  └─ PeerRegistry (≤ max_peers)                        │
//! │      ├─ LocalTrackBinder                              │
//! │      └─ Peer (one per remote id)                      │
//! │          ├─ NegotiationCoordinator                    │
//! │          ├─ ConnectionHealthMonitor                   │
//! │          └─ MediaConnection (webrtc-rs)               │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use meeting_mesh::{IceServerConfig, MeshConfig};
//!
//! let config = MeshConfig::default()
//!     .with_room("standup")
//!     .with_local_id("alice")
//!     .with_max_peers(6)
//!     .with_ice_servers(vec![IceServerConfig::stun("stun:stun.l.google.com:19302")]);
//!
//! assert!(config.validate().is_ok());
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{IceServerConfig, MeshConfig, DEFAULT_MAX_PEERS};
pub use error::{Error, Result};
pub use media::{LocalMediaSource, LocalTrack, RemoteStream, RemoteTrack, TrackKind};
pub use peer::{
    ConnectionState, IceRestartPolicy, PeerConnectionFactory, PeerRegistry, PeerSnapshot,
    RtcConnectionFactory, SignalingState,
};
pub use session::MeshSession;
pub use signaling::{InboundSignal, OutboundSignal, SignalingChannel, WebSocketSignaling};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

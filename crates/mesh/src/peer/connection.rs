//! Transport-level peer connection seam
//!
//! [`MediaConnection`] is everything the negotiation engine needs from a
//! peer connection. The production implementation wraps a webrtc-rs
//! `RTCPeerConnection` (see [`factory`](super::factory)); tests use the
//! in-memory connection from `peer::mock`.

use super::state::{ConnectionState, SignalingState};
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// SDP offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// SDP answer
    Answer,
    /// Discard the pending description
    Rollback,
}

/// Session description as exchanged over signaling (`{type, sdp}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as exchanged over signaling (`RTCIceCandidateInit` shape)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media line index
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the attribute line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Event raised by a connection's taps
#[derive(Debug, Clone)]
pub enum PeerEventKind {
    /// The connection needs an offer/answer round
    NegotiationNeeded,
    /// A local ICE candidate was gathered; `None` marks end-of-candidates
    LocalCandidate(Option<IceCandidate>),
    /// A remote media track arrived
    Track(RemoteTrack),
    /// Aggregate connectivity state changed
    ConnectionState(ConnectionState),
}

/// Connection event tagged with its origin
#[derive(Debug, Clone)]
pub struct PeerEvent {
    /// Remote peer the connection belongs to
    pub peer_id: String,
    /// Connection instance that raised the event
    pub connection_id: String,
    /// What happened
    pub kind: PeerEventKind,
}

/// Sender side of the connection event stream
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Receiver side of the connection event stream
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// Tags events for one connection instance before handing them to the engine
#[derive(Debug, Clone)]
pub struct EventTap {
    peer_id: String,
    connection_id: String,
    tx: PeerEventSender,
}

impl EventTap {
    /// Create a tap for the given connection instance
    pub fn new(peer_id: &str, connection_id: &str, tx: PeerEventSender) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            connection_id: connection_id.to_string(),
            tx,
        }
    }

    /// Remote peer the tagged connection belongs to
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Tagged connection instance
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Forward an event; dropped silently once the engine has shut down
    pub fn emit(&self, kind: PeerEventKind) {
        let _ = self.tx.send(PeerEvent {
            peer_id: self.peer_id.clone(),
            connection_id: self.connection_id.clone(),
            kind,
        });
    }
}

/// One transport-level peer connection
#[async_trait]
pub trait MediaConnection: Send + Sync {
    /// Connection instance identifier
    fn connection_id(&self) -> &str;

    /// Current JSEP signaling state
    fn signaling_state(&self) -> SignalingState;

    /// Current aggregate connectivity state
    fn connection_state(&self) -> ConnectionState;

    /// Synthesize an offer, optionally requesting an ICE restart
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    /// Synthesize an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Commit a local description
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Apply a remote description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Discard the pending local offer, returning to `stable`
    ///
    /// A no-op from `stable`; fails from any state other than
    /// `have-local-offer`. Outbound tracks survive the rollback and may
    /// raise negotiation-needed again.
    async fn rollback(&self) -> Result<()>;

    /// Apply a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Add an outbound track
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()>;

    /// Kinds of the outbound tracks currently attached
    async fn sender_kinds(&self) -> Vec<TrackKind>;

    /// Detach every event tap and close the connection
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_wire_shape() {
        let desc = SessionDescription::offer("v=0");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json, serde_json::json!({"type": "offer", "sdp": "v=0"}));
    }

    #[test]
    fn test_ice_candidate_wire_shape() {
        let json = r#"{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let candidate: IceCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert!(candidate.username_fragment.is_none());

        let back = serde_json::to_value(&candidate).unwrap();
        assert!(back.get("sdpMLineIndex").is_some());
        assert!(back.get("usernameFragment").is_none());
    }

    #[test]
    fn test_event_tap_tags_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tap = EventTap::new("p", "c-1", tx);
        tap.emit(PeerEventKind::NegotiationNeeded);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.peer_id, "p");
        assert_eq!(event.connection_id, "c-1");
        assert!(matches!(event.kind, PeerEventKind::NegotiationNeeded));
    }
}

//! Peer connection management
//!
//! Handles peer lifecycle, perfect negotiation, and connection recovery.

pub mod connection;
pub mod factory;
pub mod health;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod negotiation;
pub mod registry;
pub mod state;

pub use connection::{
    EventTap, IceCandidate, MediaConnection, PeerEvent, PeerEventKind, SdpType,
    SessionDescription,
};
pub use factory::{PeerConnectionFactory, RtcConnection, RtcConnectionFactory};
pub use health::{ConnectionHealthMonitor, HealthAction, IceRestartPolicy};
pub use negotiation::{AnswerOutcome, NegotiationCoordinator, OfferOutcome, RoundOutcome};
pub use registry::{Peer, PeerRegistry, PeerSnapshot};
pub use state::{ConnectionState, NegotiationPhase, NegotiationState, PeerRole, SignalingState};

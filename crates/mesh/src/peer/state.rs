//! Per-peer negotiation flags and connection states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Signaling state of the underlying connection (JSEP)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    /// No offer/answer exchange in progress
    Stable,
    /// A local offer has been committed, waiting for the answer
    HaveLocalOffer,
    /// A remote offer has been applied, an answer is owed
    HaveRemoteOffer,
    /// Local provisional answer committed
    HaveLocalPranswer,
    /// Remote provisional answer applied
    HaveRemotePranswer,
    /// Connection closed
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::HaveLocalPranswer => "have-local-pranswer",
            SignalingState::HaveRemotePranswer => "have-remote-pranswer",
            SignalingState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Aggregate connectivity state of the underlying connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Initial state, connection not yet started
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Connection established successfully
    Connected,
    /// Connectivity temporarily lost
    Disconnected,
    /// Connection failed; recovery requires an ICE restart
    Failed,
    /// Connection closed
    Closed,
}

/// Observable phase of the negotiation FSM
///
/// Derived from the connection's signaling state plus the local flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// Nothing in flight
    Stable,
    /// Local offer committed
    HaveLocalOffer,
    /// Remote offer applied
    HaveRemoteOffer,
    /// Offer synthesis in progress
    MakingOffer,
    /// Remote answer being applied
    SettingRemoteAnswer,
}

/// Tie-break role of the local side for one remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Defers on collision: rolls back its own offer
    Polite,
    /// Wins on collision: ignores the remote offer
    Impolite,
}

impl PeerRole {
    /// Derive the local role from both participant identifiers
    ///
    /// The lexicographically smaller identifier is polite. Both sides
    /// evaluate the same comparison, so they always hold opposite roles.
    pub fn derive(local_id: &str, remote_id: &str) -> Self {
        if local_id < remote_id {
            PeerRole::Polite
        } else {
            PeerRole::Impolite
        }
    }

    /// Whether this role is polite
    pub fn is_polite(self) -> bool {
        self == PeerRole::Polite
    }
}

/// Perfect-negotiation flags for one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationState {
    /// True between "offer creation started" and "local description set or aborted"
    pub making_offer: bool,
    /// True while a remote answer is being applied
    pub is_setting_remote_answer_pending: bool,
    /// True from accepting a remote offer until its answer is committed
    pub is_applying_remote_offer: bool,
    /// Latched decision to discard the last colliding offer
    pub ignore_offer: bool,
    /// Tie-break role
    pub polite: bool,
    /// A negotiation round is in flight
    pub negotiating: bool,
    /// A trigger arrived while a round was in flight
    pub need_negotiation: bool,
}

impl NegotiationState {
    /// Fresh state for the given role
    pub fn new(role: PeerRole) -> Self {
        Self {
            making_offer: false,
            is_setting_remote_answer_pending: false,
            is_applying_remote_offer: false,
            ignore_offer: false,
            polite: role.is_polite(),
            negotiating: false,
            need_negotiation: false,
        }
    }

    /// Try to start a negotiation round
    ///
    /// Returns `false` and records the trigger if a round is already in flight.
    pub fn begin_round(&mut self) -> bool {
        if self.negotiating {
            self.need_negotiation = true;
            return false;
        }
        self.negotiating = true;
        true
    }

    /// Finish the current round
    ///
    /// Returns `true` if a coalesced trigger is pending; the next round is
    /// then already marked in flight.
    pub fn finish_round(&mut self) -> bool {
        self.making_offer = false;
        if self.need_negotiation {
            self.need_negotiation = false;
            return true;
        }
        self.negotiating = false;
        false
    }

    /// Whether a remote offer can be applied without colliding
    pub fn ready_for_offer(&self, signaling: SignalingState) -> bool {
        !self.making_offer
            && (signaling == SignalingState::Stable
                || (signaling == SignalingState::HaveLocalOffer
                    && self.is_setting_remote_answer_pending))
    }

    /// Whether a local offer may be originated now
    pub fn can_offer(&self, signaling: SignalingState) -> bool {
        signaling == SignalingState::Stable && !self.is_applying_remote_offer
    }

    /// Current FSM phase
    pub fn phase(&self, signaling: SignalingState) -> NegotiationPhase {
        if self.making_offer {
            NegotiationPhase::MakingOffer
        } else if self.is_setting_remote_answer_pending {
            NegotiationPhase::SettingRemoteAnswer
        } else if self.is_applying_remote_offer {
            NegotiationPhase::HaveRemoteOffer
        } else {
            match signaling {
                SignalingState::HaveLocalOffer | SignalingState::HaveLocalPranswer => {
                    NegotiationPhase::HaveLocalOffer
                }
                SignalingState::HaveRemoteOffer | SignalingState::HaveRemotePranswer => {
                    NegotiationPhase::HaveRemoteOffer
                }
                SignalingState::Stable | SignalingState::Closed => NegotiationPhase::Stable,
            }
        }
    }
}

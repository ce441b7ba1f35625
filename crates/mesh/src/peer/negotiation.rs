//! Perfect-negotiation coordinator
//!
//! One [`NegotiationCoordinator`] exists per remote peer. It owns that
//! peer's [`NegotiationState`] and drives the offer/answer exchange over
//! the peer's [`MediaConnection`]:
//!
//! - local negotiation triggers run as single-flight rounds; triggers that
//!   arrive while a round is in flight are coalesced into one replay
//! - colliding remote offers are resolved by role: the polite side rolls
//!   back and answers, the impolite side ignores the offer
//! - every resumption after an await re-validates the signaling state
//!   before committing, so a round overtaken by another message is
//!   abandoned in place
//!
//! The state lock is never held across an await.

use super::connection::{IceCandidate, MediaConnection, SessionDescription};
use super::state::{
    ConnectionState, NegotiationPhase, NegotiationState, PeerRole, SignalingState,
};
use crate::signaling::SignalingHandle;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of one local offer round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Offer committed and sent
    Sent,
    /// Connection was not stable when the round started
    NotStable,
    /// State changed while the offer was synthesized
    Aborted,
}

/// Result of handling a remote offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Answer committed and sent
    Answered,
    /// Colliding offer discarded by the impolite side
    Ignored,
    /// Another message moved the state on before the answer was committed
    Superseded,
}

/// Result of handling a remote answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Answer applied
    Applied,
    /// No local offer outstanding; answer discarded
    Stray,
}

/// Offer/answer state machine for one remote peer
pub struct NegotiationCoordinator {
    peer_id: String,
    connection: Arc<dyn MediaConnection>,
    signaling: SignalingHandle,
    state: Mutex<NegotiationState>,
}

impl NegotiationCoordinator {
    /// Create a coordinator for `peer_id` with the given tie-break role
    pub fn new(
        peer_id: impl Into<String>,
        role: PeerRole,
        connection: Arc<dyn MediaConnection>,
        signaling: SignalingHandle,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            connection,
            signaling,
            state: Mutex::new(NegotiationState::new(role)),
        }
    }

    /// Remote peer this coordinator negotiates with
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Snapshot of the negotiation flags
    pub fn state(&self) -> NegotiationState {
        self.state.lock().clone()
    }

    /// Current FSM phase
    pub fn phase(&self) -> NegotiationPhase {
        let signaling = self.connection.signaling_state();
        self.state.lock().phase(signaling)
    }

    /// Whether the local side is polite towards this peer
    pub fn is_polite(&self) -> bool {
        self.state.lock().polite
    }

    /// Aggregate connectivity state of the underlying connection
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.connection_state()
    }

    /// Handle a negotiation-needed trigger
    ///
    /// Returns immediately if a round is already in flight; the trigger is
    /// then replayed once that round finishes. Otherwise runs rounds until
    /// no coalesced trigger is pending. Errors are logged; they end the
    /// round, never the peer.
    #[instrument(skip(self), fields(peer_id = %self.peer_id))]
    pub async fn on_negotiation_needed(&self) {
        if !self.state.lock().begin_round() {
            debug!("Negotiation in flight, coalescing trigger");
            return;
        }

        self.run_round().await;
        self.finish_rounds().await;
    }

    async fn run_round(&self) {
        match self.offer_round().await {
            Ok(outcome) => debug!(?outcome, "Negotiation round finished"),
            Err(e) => warn!("Negotiation round failed: {}", e),
        }
    }

    /// Close the current round, replaying coalesced triggers until none remain
    async fn finish_rounds(&self) {
        while self.state.lock().finish_round() {
            debug!("Replaying coalesced negotiation trigger");
            self.run_round().await;
        }
    }

    fn can_offer(&self) -> bool {
        let signaling = self.connection.signaling_state();
        self.state.lock().can_offer(signaling)
    }

    async fn offer_round(&self) -> Result<RoundOutcome> {
        if !self.can_offer() {
            return Ok(RoundOutcome::NotStable);
        }

        self.state.lock().making_offer = true;
        let offer = self.connection.create_offer(false).await?;

        if !self.can_offer() {
            debug!("Signaling state changed during offer creation, aborting round");
            return Ok(RoundOutcome::Aborted);
        }

        self.connection.set_local_description(offer.clone()).await?;
        self.state.lock().making_offer = false;

        self.signaling.send_offer(&self.peer_id, offer)?;
        Ok(RoundOutcome::Sent)
    }

    /// Handle an offer received from the remote peer
    ///
    /// Local offers are held off from accepting the offer until its answer
    /// is committed, including the stable gap a polite rollback leaves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RollbackFailed`] if a polite rollback or the remote
    /// offer applied after it fails; the peer must then be torn down. Any
    /// other error abandons this round only.
    #[instrument(skip(self, offer), fields(peer_id = %self.peer_id))]
    pub async fn handle_remote_offer(&self, offer: SessionDescription) -> Result<OfferOutcome> {
        let signaling = self.connection.signaling_state();

        let collision = {
            let mut st = self.state.lock();
            let collision = !st.ready_for_offer(signaling);
            st.ignore_offer = !st.polite && collision;
            if st.ignore_offer {
                info!(%signaling, "Ignoring colliding offer (impolite)");
                return Ok(OfferOutcome::Ignored);
            }
            st.is_applying_remote_offer = true;
            collision
        };

        let result = self.apply_and_answer(offer, collision, signaling).await;
        self.state.lock().is_applying_remote_offer = false;
        result
    }

    async fn apply_and_answer(
        &self,
        offer: SessionDescription,
        collision: bool,
        signaling: SignalingState,
    ) -> Result<OfferOutcome> {
        if collision {
            info!(%signaling, "Offer collision, rolling back local offer (polite)");
            self.rollback_and_apply(offer).await?;
        } else {
            self.connection.set_remote_description(offer).await?;
        }

        let answer = self.connection.create_answer().await?;

        if self.connection.signaling_state() != SignalingState::HaveRemoteOffer {
            debug!(
                state = %self.connection.signaling_state(),
                "Remote offer superseded before answer commit"
            );
            return Ok(OfferOutcome::Superseded);
        }

        self.connection.set_local_description(answer.clone()).await?;
        self.signaling.send_answer(&self.peer_id, answer)?;
        Ok(OfferOutcome::Answered)
    }

    async fn rollback_and_apply(&self, offer: SessionDescription) -> Result<()> {
        let step = async {
            self.connection.rollback().await?;
            self.connection.set_remote_description(offer).await
        };
        step.await.map_err(|e| Error::RollbackFailed {
            peer_id: self.peer_id.clone(),
            reason: e.to_string(),
        })
    }

    /// Handle an answer received from the remote peer
    ///
    /// Answers arriving outside `have-local-offer` are stray and discarded.
    #[instrument(skip(self, answer), fields(peer_id = %self.peer_id))]
    pub async fn handle_remote_answer(&self, answer: SessionDescription) -> Result<AnswerOutcome> {
        let signaling = self.connection.signaling_state();
        if signaling != SignalingState::HaveLocalOffer {
            debug!(%signaling, "Discarding stray answer");
            return Ok(AnswerOutcome::Stray);
        }

        self.state.lock().is_setting_remote_answer_pending = true;
        let result = self.connection.set_remote_description(answer).await;
        self.state.lock().is_setting_remote_answer_pending = false;

        result.map(|()| AnswerOutcome::Applied)
    }

    /// Apply a remote ICE candidate
    ///
    /// `None` (end-of-candidates) is a no-op. Apply failures are logged
    /// and never close the connection.
    pub async fn handle_remote_candidate(&self, candidate: Option<IceCandidate>) {
        let Some(candidate) = candidate else {
            return;
        };
        if let Err(e) = self.connection.add_ice_candidate(candidate).await {
            debug!(peer_id = %self.peer_id, "Failed to apply ICE candidate: {}", e);
        }
    }

    /// Forward a locally gathered ICE candidate to the remote peer
    ///
    /// The end-of-candidates marker (`None`) is not emitted.
    pub fn handle_local_candidate(&self, candidate: Option<IceCandidate>) -> Result<()> {
        match candidate {
            Some(candidate) => self.signaling.send_ice_candidate(&self.peer_id, candidate),
            None => Ok(()),
        }
    }

    /// Offer with the ICE-restart flag
    ///
    /// The restart occupies the single-flight round slot, so it never runs
    /// beside a negotiation round and triggers arriving meanwhile are
    /// replayed afterwards. `making_offer` is held while the offer is built
    /// so a remote offer arriving meanwhile is treated as a collision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SdpError`] without offering if a round is in flight
    /// or the connection is not stable; the caller may retry later.
    #[instrument(skip(self), fields(peer_id = %self.peer_id))]
    pub async fn restart_ice(&self) -> Result<()> {
        {
            let signaling = self.connection.signaling_state();
            let mut st = self.state.lock();
            if st.negotiating {
                return Err(Error::SdpError(
                    "negotiation in flight, ICE restart deferred".to_string(),
                ));
            }
            if !st.can_offer(signaling) {
                return Err(Error::SdpError(format!(
                    "cannot restart ICE in {}",
                    signaling
                )));
            }
            st.begin_round();
            st.making_offer = true;
        }

        let result = self.ice_restart_offer().await;
        self.finish_rounds().await;
        result
    }

    async fn ice_restart_offer(&self) -> Result<()> {
        let offer = self.connection.create_offer(true).await?;
        if !self.can_offer() {
            return Err(Error::SdpError(
                "signaling state changed during ICE restart".to_string(),
            ));
        }
        self.connection.set_local_description(offer.clone()).await?;
        self.state.lock().making_offer = false;
        info!("ICE restart offer committed");
        self.signaling.send_offer(&self.peer_id, offer)
    }
}

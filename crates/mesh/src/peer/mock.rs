//! In-memory connection for exercising the engine without a network
//!
//! [`MockConnection`] models the JSEP signaling state machine closely enough
//! for negotiation to run end to end: descriptions move it between
//! `stable`, `have-local-offer` and `have-remote-offer`, illegal transitions
//! fail, and adding a track raises negotiation-needed through the event tap
//! like a real connection does. A rollback behaves like the webrtc-rs
//! rebuild: only `have-local-offer` can be rolled back, and outbound tracks
//! are re-attached, raising negotiation-needed again. Failures can be
//! injected per call.

use super::connection::{
    EventTap, IceCandidate, MediaConnection, PeerEventKind, SdpType, SessionDescription,
};
use super::factory::PeerConnectionFactory;
use super::state::{ConnectionState, SignalingState};
use crate::config::IceServerConfig;
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Default)]
struct Inner {
    signaling: Option<SignalingState>,
    connection: Option<ConnectionState>,
    has_remote_description: bool,
    offers_created: usize,
    ice_restart_offers: usize,
    answers_created: usize,
    rollbacks: usize,
    local_descriptions: Vec<SessionDescription>,
    remote_descriptions: Vec<SessionDescription>,
    candidates: Vec<IceCandidate>,
    tracks: Vec<Arc<LocalTrack>>,
    close_count: usize,
    fail_create_offer: bool,
    fail_set_remote: bool,
    fail_rollback: bool,
    fail_add_track: bool,
}

/// Scriptable in-memory [`MediaConnection`]
pub struct MockConnection {
    peer_id: String,
    connection_id: String,
    tap: Mutex<Option<EventTap>>,
    inner: Mutex<Inner>,
    offer_gate: watch::Sender<bool>,
}

impl std::fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnection")
            .field("peer_id", &self.peer_id)
            .field("connection_id", &self.connection_id)
            .field("signaling", &self.signaling_state())
            .finish()
    }
}

impl MockConnection {
    /// Connection whose events are forwarded through `tap`
    pub fn new(peer_id: &str, connection_id: &str, tap: Option<EventTap>) -> Arc<Self> {
        let (offer_gate, _) = watch::channel(true);
        Arc::new(Self {
            peer_id: peer_id.to_string(),
            connection_id: connection_id.to_string(),
            tap: Mutex::new(tap),
            inner: Mutex::new(Inner::default()),
            offer_gate,
        })
    }

    /// Connection with no event tap
    pub fn detached(peer_id: &str) -> Arc<Self> {
        Self::new(peer_id, &format!("{}-detached", peer_id), None)
    }

    /// Remote peer this connection was created for
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn emit(&self, kind: PeerEventKind) {
        if let Some(tap) = self.tap.lock().as_ref() {
            tap.emit(kind);
        }
    }

    /// Raise negotiation-needed
    pub fn emit_negotiation_needed(&self) {
        self.emit(PeerEventKind::NegotiationNeeded);
    }

    /// Move to `state` and raise a connection-state event
    pub fn emit_connection_state(&self, state: ConnectionState) {
        self.inner.lock().connection = Some(state);
        self.emit(PeerEventKind::ConnectionState(state));
    }

    /// Deliver a remote track
    pub fn emit_track(&self, track: RemoteTrack) {
        self.emit(PeerEventKind::Track(track));
    }

    /// Raise a locally gathered candidate
    pub fn emit_local_candidate(&self, candidate: Option<IceCandidate>) {
        self.emit(PeerEventKind::LocalCandidate(candidate));
    }

    /// Block offer synthesis until [`release_offers`](Self::release_offers)
    pub fn hold_offers(&self) {
        self.offer_gate.send_replace(false);
    }

    /// Let held offers complete
    pub fn release_offers(&self) {
        self.offer_gate.send_replace(true);
    }

    /// Fail the next `create_offer`
    pub fn fail_next_create_offer(&self) {
        self.inner.lock().fail_create_offer = true;
    }

    /// Fail the next `set_remote_description`
    pub fn fail_next_set_remote(&self) {
        self.inner.lock().fail_set_remote = true;
    }

    /// Fail the next `rollback`
    pub fn fail_next_rollback(&self) {
        self.inner.lock().fail_rollback = true;
    }

    /// Fail the next `add_track`
    pub fn fail_next_add_track(&self) {
        self.inner.lock().fail_add_track = true;
    }

    /// Offers synthesized so far
    pub fn offers_created(&self) -> usize {
        self.inner.lock().offers_created
    }

    /// Offers synthesized with the ICE-restart flag
    pub fn ice_restart_offers(&self) -> usize {
        self.inner.lock().ice_restart_offers
    }

    /// Answers synthesized so far
    pub fn answers_created(&self) -> usize {
        self.inner.lock().answers_created
    }

    /// Rollbacks performed
    pub fn rollbacks(&self) -> usize {
        self.inner.lock().rollbacks
    }

    /// Local descriptions committed, in order
    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.inner.lock().local_descriptions.clone()
    }

    /// Remote descriptions applied, in order
    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.inner.lock().remote_descriptions.clone()
    }

    /// Remote candidates applied
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.inner.lock().candidates.clone()
    }

    /// Outbound tracks attached
    pub fn tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.inner.lock().tracks.clone()
    }

    /// Number of `close` calls
    pub fn close_count(&self) -> usize {
        self.inner.lock().close_count
    }

    /// Whether the event tap has been detached
    pub fn is_detached(&self) -> bool {
        self.tap.lock().is_none()
    }

    fn closed_error(&self) -> Error {
        Error::ConnectionClosed(self.peer_id.clone())
    }
}

#[async_trait]
impl MediaConnection for MockConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn signaling_state(&self) -> SignalingState {
        self.inner.lock().signaling.unwrap_or(SignalingState::Stable)
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner.lock().connection.unwrap_or(ConnectionState::New)
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let mut gate = self.offer_gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|e| Error::SdpError(e.to_string()))?;

        let mut inner = self.inner.lock();
        if inner.signaling == Some(SignalingState::Closed) {
            return Err(self.closed_error());
        }
        if std::mem::take(&mut inner.fail_create_offer) {
            return Err(Error::SdpError("injected create_offer failure".to_string()));
        }
        inner.offers_created += 1;
        if ice_restart {
            inner.ice_restart_offers += 1;
        }
        Ok(SessionDescription::offer(format!(
            "offer {} #{} restart={}",
            self.connection_id, inner.offers_created, ice_restart
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut inner = self.inner.lock();
        let state = inner.signaling.unwrap_or(SignalingState::Stable);
        if state != SignalingState::HaveRemoteOffer {
            return Err(Error::SdpError(format!("cannot answer in {}", state)));
        }
        inner.answers_created += 1;
        Ok(SessionDescription::answer(format!(
            "answer {} #{}",
            self.connection_id, inner.answers_created
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = inner.signaling.unwrap_or(SignalingState::Stable);
        let next = match (desc.sdp_type, state) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveLocalOffer,
            (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
            (SdpType::Rollback, _) => SignalingState::Stable,
            (sdp_type, state) => {
                return Err(Error::SdpError(format!(
                    "cannot set local {:?} in {}",
                    sdp_type, state
                )))
            }
        };
        inner.signaling = Some(next);
        inner.local_descriptions.push(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut inner = self.inner.lock();
        if std::mem::take(&mut inner.fail_set_remote) {
            return Err(Error::SdpError(
                "injected set_remote_description failure".to_string(),
            ));
        }
        let state = inner.signaling.unwrap_or(SignalingState::Stable);
        let next = match (desc.sdp_type, state) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
            (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (sdp_type, state) => {
                return Err(Error::SdpError(format!(
                    "cannot set remote {:?} in {}",
                    sdp_type, state
                )))
            }
        };
        inner.signaling = Some(next);
        inner.has_remote_description = true;
        inner.remote_descriptions.push(desc);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let reattached = {
            let mut inner = self.inner.lock();
            if std::mem::take(&mut inner.fail_rollback) {
                return Err(Error::SdpError("injected rollback failure".to_string()));
            }
            match inner.signaling.unwrap_or(SignalingState::Stable) {
                SignalingState::Stable => return Ok(()),
                SignalingState::HaveLocalOffer => {
                    inner.signaling = Some(SignalingState::Stable);
                    inner.rollbacks += 1;
                    !inner.tracks.is_empty()
                }
                state => {
                    return Err(Error::SdpError(format!("cannot roll back in {}", state)))
                }
            }
        };
        // the rebuilt transport re-adds every outbound track
        if reattached {
            self.emit(PeerEventKind::NegotiationNeeded);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.has_remote_description {
            return Err(Error::IceCandidateError(
                "no remote description".to_string(),
            ));
        }
        inner.candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if std::mem::take(&mut inner.fail_add_track) {
                return Err(Error::MediaTrackError("injected add_track failure".to_string()));
            }
            if inner.signaling == Some(SignalingState::Closed) {
                return Err(self.closed_error());
            }
            inner.tracks.push(track);
        }
        self.emit(PeerEventKind::NegotiationNeeded);
        Ok(())
    }

    async fn sender_kinds(&self) -> Vec<TrackKind> {
        self.inner.lock().tracks.iter().map(|t| t.kind()).collect()
    }

    async fn close(&self) -> Result<()> {
        self.tap.lock().take();
        let mut inner = self.inner.lock();
        inner.close_count += 1;
        inner.signaling = Some(SignalingState::Closed);
        inner.connection = Some(ConnectionState::Closed);
        Ok(())
    }
}

/// Factory producing [`MockConnection`]s and keeping a handle to each
#[derive(Debug, Default)]
pub struct MockConnectionFactory {
    created: Mutex<Vec<Arc<MockConnection>>>,
    fail_next: Mutex<bool>,
}

impl MockConnectionFactory {
    /// Empty factory
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `create`
    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }

    /// Every connection created so far
    pub fn created(&self) -> Vec<Arc<MockConnection>> {
        self.created.lock().clone()
    }

    /// Most recent connection created for `peer_id`
    pub fn latest(&self, peer_id: &str) -> Option<Arc<MockConnection>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|c| c.peer_id() == peer_id)
            .cloned()
    }

    /// Number of connections created for `peer_id`
    pub fn count_for(&self, peer_id: &str) -> usize {
        self.created
            .lock()
            .iter()
            .filter(|c| c.peer_id() == peer_id)
            .count()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockConnectionFactory {
    async fn create(
        &self,
        peer_id: &str,
        connection_id: &str,
        ice_servers: &[IceServerConfig],
        tap: EventTap,
    ) -> Result<Arc<dyn MediaConnection>> {
        for server in ice_servers {
            server.validate()?;
        }
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(Error::PeerConnectionError(
                "injected factory failure".to_string(),
            ));
        }
        let connection = MockConnection::new(peer_id, connection_id, Some(tap));
        self.created.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signaling_transitions() {
        let conn = MockConnection::detached("p");
        let offer = conn.create_offer(false).await.unwrap();
        conn.set_local_description(offer).await.unwrap();
        assert_eq!(conn.signaling_state(), SignalingState::HaveLocalOffer);

        // a remote offer cannot be applied over a pending local one
        assert!(conn
            .set_remote_description(SessionDescription::offer("x"))
            .await
            .is_err());

        conn.rollback().await.unwrap();
        assert_eq!(conn.signaling_state(), SignalingState::Stable);
        assert_eq!(conn.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_rollback_reattaches_tracks() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let conn = MockConnection::new("p", "c", Some(EventTap::new("p", "c", tx)));
        conn.add_track(LocalTrack::audio("mic", "local")).await.unwrap();
        assert!(rx.try_recv().is_ok());

        let offer = conn.create_offer(false).await.unwrap();
        conn.set_local_description(offer).await.unwrap();
        conn.rollback().await.unwrap();

        let event = rx.try_recv().unwrap();
        assert!(matches!(event.kind, PeerEventKind::NegotiationNeeded));
        assert_eq!(conn.tracks().len(), 1);

        // nothing to undo from stable or from a remote offer
        conn.rollback().await.unwrap();
        assert_eq!(conn.rollbacks(), 1);
        conn.set_remote_description(SessionDescription::offer("x"))
            .await
            .unwrap();
        assert!(conn.rollback().await.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_detaches_tap() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let conn = MockConnection::new("p", "c", Some(EventTap::new("p", "c", tx)));
        conn.emit_negotiation_needed();
        assert!(rx.try_recv().is_ok());

        conn.close().await.unwrap();
        conn.emit_negotiation_needed();
        assert!(rx.try_recv().is_err());
        assert!(conn.is_detached());
        assert_eq!(conn.signaling_state(), SignalingState::Closed);
    }
}

//! Peer connection construction
//!
//! [`RtcConnectionFactory`] builds webrtc-rs connections with a fixed media
//! configuration and wires the connection's callbacks (negotiation needed,
//! ICE candidates, inbound tracks, state changes) into an [`EventTap`]. The
//! taps only forward; every decision is made by the registry. Signaling,
//! ICE gathering and ICE connection transitions are logged, and a failed
//! connection logs its selected candidate pair.
//!
//! webrtc-rs cannot roll back a local offer, so [`RtcConnection`] rolls
//! back by replacing its inner connection with a fresh one carrying the
//! same configuration, outbound tracks and event tap.

use super::connection::{
    EventTap, IceCandidate, MediaConnection, PeerEventKind, SdpType, SessionDescription,
};
use super::state::{ConnectionState, SignalingState};
use crate::config::IceServerConfig;
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::stats::{StatsReport, StatsReportType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds transport-level peer connections
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Create a connection for `peer_id` configured with `ice_servers`
    ///
    /// Every event the connection raises is forwarded through `tap`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIceConfiguration`] if a descriptor is
    /// malformed; the failure is confined to this peer.
    async fn create(
        &self,
        peer_id: &str,
        connection_id: &str,
        ice_servers: &[IceServerConfig],
        tap: EventTap,
    ) -> Result<Arc<dyn MediaConnection>>;
}

/// Convert ICE server descriptors into webrtc-rs configuration
#[allow(clippy::needless_update)]
pub fn rtc_ice_servers(ice_servers: &[IceServerConfig]) -> Result<Vec<RTCIceServer>> {
    ice_servers
        .iter()
        .map(|server| {
            server.validate()?;
            Ok(RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
        })
        .collect()
}

/// Factory backed by webrtc-rs
pub struct RtcConnectionFactory {
    api: Arc<API>,
}

impl RtcConnectionFactory {
    /// Build the shared API with default codecs and interceptors
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();

        // Opus for audio, VP8/VP9/H.264 for video
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        Ok(Self { api: Arc::new(api) })
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcConnectionFactory {
    #[instrument(skip(self, ice_servers, tap), fields(peer_id = %peer_id, connection_id = %connection_id))]
    async fn create(
        &self,
        peer_id: &str,
        connection_id: &str,
        ice_servers: &[IceServerConfig],
        tap: EventTap,
    ) -> Result<Arc<dyn MediaConnection>> {
        let rtc_config = RTCConfiguration {
            ice_servers: rtc_ice_servers(ice_servers)?,
            ..Default::default()
        };

        let pc = new_peer_connection(&self.api, rtc_config.clone()).await?;
        wire_taps(&pc, tap.clone());
        info!("Peer connection created");

        Ok(Arc::new(RtcConnection {
            peer_id: peer_id.to_string(),
            connection_id: connection_id.to_string(),
            api: Arc::clone(&self.api),
            config: rtc_config,
            tap,
            tracks: Mutex::new(Vec::new()),
            pc: RwLock::new(pc),
        }))
    }
}

async fn new_peer_connection(
    api: &API,
    config: RTCConfiguration,
) -> Result<Arc<RTCPeerConnection>> {
    let pc = api.new_peer_connection(config).await.map_err(|e| {
        Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
    })?;
    Ok(Arc::new(pc))
}

fn wire_taps(pc: &Arc<RTCPeerConnection>, tap: EventTap) {
    let negotiation_tap = tap.clone();
    pc.on_negotiation_needed(Box::new(move || {
        negotiation_tap.emit(PeerEventKind::NegotiationNeeded);
        Box::pin(async {})
    }));

    let candidate_tap = tap.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        match candidate.map(|c| c.to_json()).transpose() {
            Ok(init) => {
                candidate_tap.emit(PeerEventKind::LocalCandidate(init.map(IceCandidate::from)))
            }
            Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
        }
        Box::pin(async {})
    }));

    let track_tap = tap.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            if let Some(kind) = TrackKind::from_codec_type(track.kind()) {
                track_tap.emit(PeerEventKind::Track(RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                    handle: Some(track),
                }));
            }
            Box::pin(async {})
        },
    ));

    let signaling_tap = tap.clone();
    pc.on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
        debug!(
            peer_id = %signaling_tap.peer_id(),
            connection_id = %signaling_tap.connection_id(),
            state = %s,
            "Signaling state changed"
        );
        Box::pin(async {})
    }));

    let gathering_tap = tap.clone();
    pc.on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
        debug!(
            peer_id = %gathering_tap.peer_id(),
            connection_id = %gathering_tap.connection_id(),
            state = %s,
            "ICE gathering state changed"
        );
        Box::pin(async {})
    }));

    let ice_tap = tap.clone();
    pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
        match s {
            RTCIceConnectionState::Disconnected | RTCIceConnectionState::Failed => warn!(
                peer_id = %ice_tap.peer_id(),
                connection_id = %ice_tap.connection_id(),
                state = %s,
                "ICE connection state changed"
            ),
            _ => debug!(
                peer_id = %ice_tap.peer_id(),
                connection_id = %ice_tap.connection_id(),
                state = %s,
                "ICE connection state changed"
            ),
        }
        Box::pin(async {})
    }));

    let weak = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        if s == RTCPeerConnectionState::Failed {
            if let Some(pc) = weak.upgrade() {
                let diag_tap = tap.clone();
                tokio::spawn(async move {
                    let report = pc.get_stats().await;
                    log_failed_pair(&report, &diag_tap);
                });
            }
        }
        if let Some(state) = map_connection_state(s) {
            tap.emit(PeerEventKind::ConnectionState(state));
        }
        Box::pin(async {})
    }));
}

/// Log the candidate pair a failed connection was using
fn log_failed_pair(report: &StatsReport, tap: &EventTap) {
    let pairs: Vec<_> = report
        .reports
        .values()
        .filter_map(|r| match r {
            StatsReportType::CandidatePair(pair) => Some(pair),
            _ => None,
        })
        .collect();

    match pairs.iter().find(|pair| pair.nominated) {
        Some(pair) => warn!(
            peer_id = %tap.peer_id(),
            connection_id = %tap.connection_id(),
            local = %describe_candidate(report, &pair.local_candidate_id),
            remote = %describe_candidate(report, &pair.remote_candidate_id),
            state = %pair.state,
            rtt = pair.current_round_trip_time,
            requests_sent = pair.requests_sent,
            responses_received = pair.responses_received,
            "Connection failed on selected candidate pair"
        ),
        None => warn!(
            peer_id = %tap.peer_id(),
            connection_id = %tap.connection_id(),
            pairs = pairs.len(),
            "Connection failed without a selected candidate pair"
        ),
    }
}

fn describe_candidate(report: &StatsReport, id: &str) -> String {
    report
        .reports
        .values()
        .find_map(|r| match r {
            StatsReportType::LocalCandidate(c) | StatsReportType::RemoteCandidate(c)
                if c.id == id =>
            {
                Some(format!("{} {}:{}", c.candidate_type, c.ip, c.port))
            }
            _ => None,
        })
        .unwrap_or_else(|| id.to_string())
}

fn detach_taps(pc: &RTCPeerConnection) {
    pc.on_negotiation_needed(Box::new(|| Box::pin(async {})));
    pc.on_ice_candidate(Box::new(|_: Option<RTCIceCandidate>| Box::pin(async {})));
    pc.on_track(Box::new(
        |_: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
            Box::pin(async {})
        },
    ));
    pc.on_signaling_state_change(Box::new(|_: RTCSignalingState| Box::pin(async {})));
    pc.on_ice_gathering_state_change(Box::new(|_: RTCIceGathererState| Box::pin(async {})));
    pc.on_ice_connection_state_change(Box::new(|_: RTCIceConnectionState| Box::pin(async {})));
    pc.on_peer_connection_state_change(Box::new(|_: RTCPeerConnectionState| Box::pin(async {})));
}

async fn attach_track(pc: &RTCPeerConnection, track: &LocalTrack) -> Result<()> {
    let sender = pc
        .add_track(track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(|e| {
            Error::MediaTrackError(format!("Failed to add {} track: {}", track.kind(), e))
        })?;

    // Drain RTCP so interceptors (NACK, reports) keep running
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });

    Ok(())
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

fn map_signaling_state(state: RTCSignalingState) -> SignalingState {
    match state {
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => SignalingState::Stable,
    }
}

/// webrtc-rs backed [`MediaConnection`]
pub struct RtcConnection {
    peer_id: String,
    connection_id: String,
    api: Arc<API>,
    config: RTCConfiguration,
    tap: EventTap,
    tracks: Mutex<Vec<Arc<LocalTrack>>>,
    pc: RwLock<Arc<RTCPeerConnection>>,
}

impl RtcConnection {
    /// Current underlying webrtc-rs connection
    ///
    /// Replaced whenever a local offer is rolled back.
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.pc.read())
    }

    /// Swap in a fresh connection carrying the outbound tracks and taps
    async fn rebuild(&self) -> Result<()> {
        let old = self.peer_connection();
        detach_taps(&old);

        let pc = new_peer_connection(&self.api, self.config.clone()).await?;
        wire_taps(&pc, self.tap.clone());
        let tracks = self.tracks.lock().clone();
        for track in &tracks {
            attach_track(&pc, track).await?;
        }
        *self.pc.write() = pc;

        if let Err(e) = old.close().await {
            warn!(peer_id = %self.peer_id, "Failed to close replaced connection: {}", e);
        }
        debug!(
            peer_id = %self.peer_id,
            tracks = tracks.len(),
            "Local offer rolled back onto a fresh connection"
        );
        Ok(())
    }

    fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
        let parsed = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
            SdpType::Rollback => {
                return Err(Error::SdpError(
                    "rollback must go through MediaConnection::rollback".to_string(),
                ))
            }
        };
        parsed.map_err(|e| Error::SdpError(format!("Failed to parse description: {}", e)))
    }

    fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
        let sdp_type = match desc.sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
            other => {
                return Err(Error::SdpError(format!(
                    "unexpected description type: {}",
                    other
                )))
            }
        };
        Ok(SessionDescription {
            sdp_type,
            sdp: desc.sdp,
        })
    }
}

#[async_trait]
impl MediaConnection for RtcConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn signaling_state(&self) -> SignalingState {
        map_signaling_state(self.peer_connection().signaling_state())
    }

    fn connection_state(&self) -> ConnectionState {
        map_connection_state(self.peer_connection().connection_state())
            .unwrap_or(ConnectionState::New)
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self
            .peer_connection()
            .create_offer(options)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        Self::from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection()
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        Self::from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection()
            .set_local_description(Self::to_rtc(desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection()
            .set_remote_description(Self::to_rtc(desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn rollback(&self) -> Result<()> {
        match self.signaling_state() {
            SignalingState::Stable => Ok(()),
            SignalingState::HaveLocalOffer => self.rebuild().await,
            state => Err(Error::SdpError(format!("cannot roll back in {}", state))),
        }
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection()
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        attach_track(&self.peer_connection(), &track).await?;
        self.tracks.lock().push(track);
        Ok(())
    }

    async fn sender_kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::new();
        for sender in self.peer_connection().get_senders().await {
            if let Some(track) = sender.track().await {
                if let Some(kind) = TrackKind::from_codec_type(track.kind()) {
                    kinds.push(kind);
                }
            }
        }
        kinds
    }

    async fn close(&self) -> Result<()> {
        info!(peer_id = %self.peer_id, connection_id = %self.connection_id, "Closing peer connection");
        let pc = self.peer_connection();
        detach_taps(&pc);
        pc.close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::negotiation::{AnswerOutcome, NegotiationCoordinator, OfferOutcome};
    use crate::peer::state::PeerRole;
    use crate::signaling::{OutboundSignal, RecordingChannel, SignalingHandle};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn only_description(sent: Vec<OutboundSignal>) -> SessionDescription {
        let mut descriptions = sent.into_iter().filter_map(|message| match message {
            OutboundSignal::Offer { sdp, .. } | OutboundSignal::Answer { sdp, .. } => Some(sdp),
            _ => None,
        });
        let desc = descriptions.next().expect("one description sent");
        assert!(descriptions.next().is_none());
        desc
    }

    #[test]
    fn test_rtc_ice_servers_mapping() {
        let servers = rtc_ice_servers(&[
            IceServerConfig::stun("stun:stun.example.com:3478"),
            IceServerConfig::turn("turn:turn.example.com:3478", "u", "p"),
        ])
        .unwrap();
        assert_eq!(servers.len(), 2);
        assert!(servers[0].username.is_empty());
        assert_eq!(servers[1].username, "u");
        assert_eq!(servers[1].credential, "p");
    }

    #[test]
    fn test_malformed_ice_rejected() {
        let err = rtc_ice_servers(&[IceServerConfig {
            urls: vec![],
            username: None,
            credential: None,
        }])
        .unwrap_err();
        assert!(matches!(err, Error::InvalidIceConfiguration(_)));
    }

    #[test]
    fn test_candidate_conversion() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let init: RTCIceCandidateInit = candidate.clone().into();
        assert_eq!(init.sdp_mid.as_deref(), Some("0"));
        assert_eq!(IceCandidate::from(init), candidate);
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Failed),
            Some(ConnectionState::Failed)
        );
        assert_eq!(
            map_connection_state(RTCPeerConnectionState::Unspecified),
            None
        );
        assert_eq!(
            map_signaling_state(RTCSignalingState::HaveLocalOffer),
            SignalingState::HaveLocalOffer
        );
    }

    #[tokio::test]
    async fn test_create_connection_and_offer() {
        let factory = RtcConnectionFactory::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let tap = EventTap::new("remote", "c-1", tx);

        let conn = factory.create("remote", "c-1", &[], tap).await.unwrap();
        assert_eq!(conn.connection_id(), "c-1");
        assert_eq!(conn.signaling_state(), SignalingState::Stable);

        conn.add_track(LocalTrack::audio("mic", "local")).await.unwrap();
        assert_eq!(conn.sender_kinds().await, vec![TrackKind::Audio]);

        let offer = conn.create_offer(false).await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        conn.set_local_description(offer).await.unwrap();
        assert_eq!(conn.signaling_state(), SignalingState::HaveLocalOffer);

        conn.rollback().await.unwrap();
        assert_eq!(conn.signaling_state(), SignalingState::Stable);
        // the fresh connection still carries the outbound track
        assert_eq!(conn.sender_kinds().await, vec![TrackKind::Audio]);

        // a rolled-back connection can offer again
        let offer = conn.create_offer(false).await.unwrap();
        conn.set_local_description(offer).await.unwrap();
        assert_eq!(conn.signaling_state(), SignalingState::HaveLocalOffer);

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_refused_with_remote_offer() {
        let factory = RtcConnectionFactory::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let offerer = factory
            .create("b", "a-1", &[], EventTap::new("b", "a-1", tx.clone()))
            .await
            .unwrap();
        let answerer = factory
            .create("a", "b-1", &[], EventTap::new("a", "b-1", tx))
            .await
            .unwrap();
        offerer
            .add_track(LocalTrack::audio("mic", "a"))
            .await
            .unwrap();

        let offer = offerer.create_offer(false).await.unwrap();
        answerer.set_remote_description(offer).await.unwrap();
        assert_eq!(answerer.signaling_state(), SignalingState::HaveRemoteOffer);
        assert!(answerer.rollback().await.is_err());

        offerer.close().await.unwrap();
        answerer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_glare_between_real_connections() {
        let factory = RtcConnectionFactory::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alice_conn = factory
            .create("bob", "a-1", &[], EventTap::new("bob", "a-1", tx.clone()))
            .await
            .unwrap();
        let bob_conn = factory
            .create("alice", "b-1", &[], EventTap::new("alice", "b-1", tx))
            .await
            .unwrap();
        alice_conn
            .add_track(LocalTrack::audio("mic", "alice"))
            .await
            .unwrap();
        bob_conn
            .add_track(LocalTrack::audio("mic", "bob"))
            .await
            .unwrap();

        let alice_out = Arc::new(RecordingChannel::new());
        let bob_out = Arc::new(RecordingChannel::new());
        let alice = NegotiationCoordinator::new(
            "bob",
            PeerRole::derive("alice", "bob"),
            alice_conn.clone(),
            SignalingHandle::new(alice_out.clone(), "room"),
        );
        let bob = NegotiationCoordinator::new(
            "alice",
            PeerRole::derive("bob", "alice"),
            bob_conn.clone(),
            SignalingHandle::new(bob_out.clone(), "room"),
        );

        // both offer before either offer arrives
        alice.on_negotiation_needed().await;
        bob.on_negotiation_needed().await;
        let alice_offer = only_description(alice_out.drain());
        let bob_offer = only_description(bob_out.drain());

        let outcome = bob.handle_remote_offer(alice_offer).await.unwrap();
        assert_eq!(outcome, OfferOutcome::Ignored);
        assert_eq!(bob_conn.signaling_state(), SignalingState::HaveLocalOffer);

        let outcome = alice.handle_remote_offer(bob_offer).await.unwrap();
        assert_eq!(outcome, OfferOutcome::Answered);
        assert_eq!(alice_conn.signaling_state(), SignalingState::Stable);
        assert!(!alice.state().is_applying_remote_offer);
        assert!(alice_conn.sender_kinds().await.contains(&TrackKind::Audio));

        let answer = only_description(alice_out.drain());
        assert_eq!(answer.sdp_type, SdpType::Answer);
        let outcome = bob.handle_remote_answer(answer).await.unwrap();
        assert_eq!(outcome, AnswerOutcome::Applied);
        assert_eq!(bob_conn.signaling_state(), SignalingState::Stable);

        alice_conn.close().await.unwrap();
        bob_conn.close().await.unwrap();
        while rx.try_recv().is_ok() {}
    }

    #[test]
    fn test_failed_pair_logging_without_stats() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let tap = EventTap::new("p", "c-1", tx);
        let report = StatsReport {
            reports: HashMap::new(),
        };
        log_failed_pair(&report, &tap);
        assert_eq!(describe_candidate(&report, "cand-1"), "cand-1");
    }
}

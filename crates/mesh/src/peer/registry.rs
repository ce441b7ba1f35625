//! Peer registry
//!
//! Owns the set of active peers, bounded by the configured maximum, and
//! routes inbound signaling and connection events to the right peer.

use super::connection::{
    EventTap, MediaConnection, PeerEvent, PeerEventKind, PeerEventReceiver, PeerEventSender,
};
use super::factory::PeerConnectionFactory;
use super::health::{ConnectionHealthMonitor, IceRestartPolicy};
use super::negotiation::NegotiationCoordinator;
use super::state::PeerRole;
use crate::config::{IceServerConfig, MeshConfig};
use crate::media::{LocalMediaSource, LocalTrackBinder, RemoteStream, RemoteTrack, TrackKind};
use crate::signaling::{InboundSignal, SignalingHandle};
use crate::Error;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

/// Peer id → most recent remote stream, as published to observers
pub type PeerSnapshot = BTreeMap<String, Option<Arc<RemoteStream>>>;

/// One remote participant's connection
pub struct Peer {
    id: String,
    connection_id: String,
    connection: Arc<dyn MediaConnection>,
    coordinator: NegotiationCoordinator,
    health: ConnectionHealthMonitor,
    remote_stream: parking_lot::RwLock<Option<Arc<RemoteStream>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Peer {
    fn new(
        id: &str,
        role: PeerRole,
        connection: Arc<dyn MediaConnection>,
        signaling: SignalingHandle,
        policy: IceRestartPolicy,
    ) -> Self {
        Self {
            id: id.to_string(),
            connection_id: connection.connection_id().to_string(),
            coordinator: NegotiationCoordinator::new(id, role, Arc::clone(&connection), signaling),
            health: ConnectionHealthMonitor::new(id, policy),
            connection,
            remote_stream: parking_lot::RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Remote participant id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier of the connection instance owned by this peer
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Underlying connection
    pub fn connection(&self) -> &Arc<dyn MediaConnection> {
        &self.connection
    }

    /// Negotiation coordinator for this peer
    pub fn coordinator(&self) -> &NegotiationCoordinator {
        &self.coordinator
    }

    /// Health monitor for this peer
    pub fn health(&self) -> &ConnectionHealthMonitor {
        &self.health
    }

    /// Most recent remote stream
    pub fn remote_stream(&self) -> Option<Arc<RemoteStream>> {
        self.remote_stream.read().clone()
    }

    fn replace_remote_stream(&self, track: RemoteTrack) -> Arc<RemoteStream> {
        let mut guard = self.remote_stream.write();
        let next = Arc::new(RemoteStream::with_track(guard.as_deref(), track));
        *guard = Some(Arc::clone(&next));
        next
    }

    /// Whether the connection is still open
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Close the connection; later calls are no-ops
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.connection.close().await {
            warn!(peer_id = %self.id, "Error closing peer connection: {}", e);
        }
    }
}

/// Owns every active [`Peer`] of the session
pub struct PeerRegistry {
    local_id: parking_lot::RwLock<Option<String>>,
    max_peers: usize,
    ice_servers: Vec<IceServerConfig>,
    ice_restart: IceRestartPolicy,
    factory: Arc<dyn PeerConnectionFactory>,
    signaling: SignalingHandle,
    binder: LocalTrackBinder,
    peers: RwLock<HashMap<String, Arc<Peer>>>,
    events: PeerEventSender,
    snapshot: watch::Sender<PeerSnapshot>,
}

impl PeerRegistry {
    /// Create an empty registry
    ///
    /// Returns the registry and the receiver of every event raised by its
    /// connections; feed those back through
    /// [`route_peer_event`](Self::route_peer_event).
    pub fn new(
        config: &MeshConfig,
        factory: Arc<dyn PeerConnectionFactory>,
        signaling: SignalingHandle,
    ) -> (Self, PeerEventReceiver) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(PeerSnapshot::new());

        let registry = Self {
            local_id: parking_lot::RwLock::new(config.local_id.clone()),
            max_peers: config.max_peers,
            ice_servers: config.ice_servers.clone(),
            ice_restart: config.ice_restart.clone(),
            factory,
            signaling,
            binder: LocalTrackBinder::new(),
            peers: RwLock::new(HashMap::new()),
            events,
            snapshot,
        };
        (registry, events_rx)
    }

    /// Set the local identity used for self-filtering and role derivation
    pub fn set_self_id(&self, id: &str) {
        let previous = self.local_id.write().replace(id.to_string());
        if previous.as_deref().is_some_and(|p| p != id) {
            warn!(
                previous = ?previous,
                local_id = id,
                "Local identity changed; existing peers keep their roles"
            );
        }
    }

    /// Local identity, if set
    pub fn local_id(&self) -> Option<String> {
        self.local_id.read().clone()
    }

    /// Maximum number of peers
    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Look up a peer
    pub async fn peer(&self, id: &str) -> Option<Arc<Peer>> {
        self.peers.read().await.get(id).cloned()
    }

    /// Ids of every registered peer, sorted
    pub async fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered peers
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether no peer is registered
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Current peer id → remote stream mapping
    pub fn snapshot(&self) -> PeerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to the peer id → remote stream mapping
    pub fn subscribe(&self) -> watch::Receiver<PeerSnapshot> {
        self.snapshot.subscribe()
    }

    fn publish(&self, peers: &HashMap<String, Arc<Peer>>) {
        let snapshot: PeerSnapshot = peers
            .iter()
            .map(|(id, peer)| (id.clone(), peer.remote_stream()))
            .collect();
        self.snapshot.send_replace(snapshot);
    }

    /// Get or create the peer for `id`
    ///
    /// Returns `None` without side effects when `id` is the local identity,
    /// when the local identity is not set yet, when the registry is full,
    /// or when the connection cannot be built. None of these are fatal.
    pub async fn add_peer(&self, id: &str) -> Option<Arc<Peer>> {
        let Some(local_id) = self.local_id() else {
            warn!(peer_id = id, "{}, not adding peer", Error::IdentityNotSet);
            return None;
        };
        if id == local_id {
            return None;
        }

        let mut peers = self.peers.write().await;
        if let Some(existing) = peers.get(id) {
            return Some(Arc::clone(existing));
        }

        if peers.len() >= self.max_peers {
            warn!(peer_id = id, "{}, skipping peer", Error::PeerLimitReached(self.max_peers));
            return None;
        }

        let connection_id = uuid::Uuid::new_v4().to_string();
        let tap = EventTap::new(id, &connection_id, self.events.clone());
        let connection = match self
            .factory
            .create(id, &connection_id, &self.ice_servers, tap)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                warn!(peer_id = id, "Failed to create peer connection: {}", e);
                return None;
            }
        };

        let role = PeerRole::derive(&local_id, id);
        let peer = Arc::new(Peer::new(
            id,
            role,
            connection,
            self.signaling.clone(),
            self.ice_restart.clone(),
        ));
        peers.insert(id.to_string(), Arc::clone(&peer));
        info!(peer_id = id, connection_id = %connection_id, ?role, "Peer added");
        self.publish(&peers);
        drop(peers);

        self.binder.bind(id, peer.connection().as_ref()).await;
        Some(peer)
    }

    /// Close and discard the peer for `id`
    ///
    /// Idempotent; returns whether a peer was removed.
    pub async fn remove_peer(&self, id: &str) -> bool {
        let mut peers = self.peers.write().await;
        let Some(peer) = peers.get(id).cloned() else {
            return false;
        };

        peer.close().await;
        peers.remove(id);
        info!(peer_id = id, "Peer removed");
        self.publish(&peers);
        true
    }

    async fn teardown(&self, peer: &Peer) {
        let mut peers = self.peers.write().await;
        peer.close().await;
        if peers
            .get(peer.id())
            .is_some_and(|current| current.connection_id() == peer.connection_id())
        {
            peers.remove(peer.id());
            warn!(peer_id = %peer.id(), "Peer torn down");
            self.publish(&peers);
        }
    }

    /// Align the peer set with an authoritative roster
    ///
    /// Peers absent from `roster` are closed and removed first, then every
    /// roster id not yet present is added.
    pub async fn reconcile<I, S>(&self, roster: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let roster: Vec<String> = roster.into_iter().map(|s| s.as_ref().to_string()).collect();
        let wanted: HashSet<&str> = roster.iter().map(String::as_str).collect();

        let stale: Vec<String> = self
            .peers
            .read()
            .await
            .keys()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();

        for id in &stale {
            self.remove_peer(id).await;
        }
        for id in &roster {
            self.add_peer(id).await;
        }
        let size = self.len().await;
        debug!(removed = stale.len(), size, "Roster reconciled");
    }

    /// Close and remove every peer
    pub async fn clear(&self) {
        let mut peers = self.peers.write().await;
        for (id, peer) in peers.iter() {
            debug!(peer_id = %id, "Closing peer");
            peer.close().await;
        }
        peers.clear();
        self.publish(&peers);
    }

    /// Attach `source` to every current and future peer
    ///
    /// Tracks whose kind is already sent on a connection are skipped.
    /// Returns the number of tracks added across current peers.
    pub async fn attach_local_stream(&self, source: LocalMediaSource) -> usize {
        self.binder.set_source(Some(source));

        let peers: Vec<Arc<Peer>> = self.peers.read().await.values().cloned().collect();
        let mut added = 0;
        for peer in peers {
            if peer.is_open() {
                added += self.binder.bind(peer.id(), peer.connection().as_ref()).await;
            }
        }
        added
    }

    /// Flip the enabled flag of the local track of `kind`
    pub fn toggle_track(&self, kind: TrackKind) -> Option<bool> {
        self.binder.toggle_track(kind)
    }

    /// Route one inbound signaling event
    ///
    /// Protocol races and per-peer failures are logged here; nothing is
    /// propagated to the caller.
    pub async fn route_signal(&self, signal: InboundSignal) {
        if let Some(from) = signal.sender() {
            if self.local_id.read().as_deref() == Some(from) {
                debug!(event = signal.event_name(), "Ignoring self-addressed signal");
                return;
            }
        }

        match signal {
            InboundSignal::Joined { participants } => {
                info!(count = participants.len(), "Joined room");
                for id in &participants {
                    self.add_peer(id).await;
                }
            }
            InboundSignal::UserJoined { user_id } => {
                self.add_peer(&user_id).await;
            }
            InboundSignal::UserLeft { user_id } => {
                self.remove_peer(&user_id).await;
            }
            InboundSignal::Roster { participants } => {
                self.reconcile(participants).await;
            }
            InboundSignal::Offer { from, sdp } => {
                let Some(peer) = self.add_peer(&from).await else {
                    debug!(peer_id = %from, "Dropping offer for unavailable peer");
                    return;
                };
                match peer.coordinator().handle_remote_offer(sdp).await {
                    Ok(outcome) => debug!(peer_id = %from, ?outcome, "Remote offer handled"),
                    Err(e) if e.requires_teardown() => {
                        warn!(peer_id = %from, "{}", e);
                        self.teardown(&peer).await;
                    }
                    Err(e) => warn!(peer_id = %from, "Remote offer failed: {}", e),
                }
            }
            InboundSignal::Answer { from, sdp } => {
                let Some(peer) = self.peer(&from).await else {
                    debug!(peer_id = %from, "Dropping answer for unknown peer");
                    return;
                };
                match peer.coordinator().handle_remote_answer(sdp).await {
                    Ok(outcome) => debug!(peer_id = %from, ?outcome, "Remote answer handled"),
                    Err(e) => warn!(peer_id = %from, "Remote answer failed: {}", e),
                }
            }
            InboundSignal::IceCandidate { from, candidate } => {
                if let Some(peer) = self.peer(&from).await {
                    peer.coordinator().handle_remote_candidate(candidate).await;
                }
            }
        }
    }

    /// Route one event raised by a peer connection
    ///
    /// Events from a connection that is no longer the registered one for
    /// its peer id are dropped.
    pub async fn route_peer_event(&self, event: PeerEvent) {
        let Some(peer) = self.peer(&event.peer_id).await else {
            return;
        };
        if peer.connection_id() != event.connection_id || !peer.is_open() {
            debug!(
                peer_id = %event.peer_id,
                connection_id = %event.connection_id,
                "Dropping event from stale connection"
            );
            return;
        }

        match event.kind {
            PeerEventKind::NegotiationNeeded => {
                peer.coordinator().on_negotiation_needed().await;
            }
            PeerEventKind::LocalCandidate(candidate) => {
                if let Err(e) = peer.coordinator().handle_local_candidate(candidate) {
                    warn!(peer_id = %peer.id(), "Failed to send ICE candidate: {}", e);
                }
            }
            PeerEventKind::Track(track) => {
                debug!(peer_id = %peer.id(), kind = %track.kind, track_id = %track.id, "Remote track");
                peer.replace_remote_stream(track);
                let peers = self.peers.read().await;
                self.publish(&peers);
            }
            PeerEventKind::ConnectionState(state) => {
                let action = peer
                    .health()
                    .on_connection_state(state, peer.coordinator(), || peer.is_open())
                    .await;
                debug!(peer_id = %peer.id(), ?state, ?action, "Connection state handled");
            }
        }
    }
}

//! Mesh session: the application-facing root
//!
//! A [`MeshSession`] owns the signaling handle and the [`PeerRegistry`],
//! feeds inbound signaling and connection events into the registry, and
//! exposes the operations an embedding application needs.

use crate::config::MeshConfig;
use crate::media::{LocalMediaSource, TrackKind};
use crate::peer::connection::PeerEventReceiver;
use crate::peer::{
    ConnectionState, PeerConnectionFactory, PeerEvent, PeerEventKind, PeerRegistry, PeerSnapshot,
};
use crate::signaling::{InboundSignal, SignalingChannel, SignalingHandle};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info};

/// One participant's view of a meeting room
///
/// # Example
///
/// ```no_run
/// use meeting_mesh::{MeshConfig, MeshSession, RtcConnectionFactory, WebSocketSignaling};
/// use std::sync::Arc;
///
/// # async fn example() -> meeting_mesh::Result<()> {
/// let config = MeshConfig::default().with_room("standup").with_local_id("alice");
/// let (channel, inbound) = WebSocketSignaling::connect(&config.signaling_url).await?;
///
/// let session = MeshSession::new(
///     config,
///     Arc::new(RtcConnectionFactory::new()?),
///     Arc::new(channel),
/// )?;
/// session.join()?;
/// session.run(inbound).await?;
/// session.leave_all().await?;
/// # Ok(())
/// # }
/// ```
pub struct MeshSession {
    config: MeshConfig,
    signaling: SignalingHandle,
    registry: Arc<PeerRegistry>,
    events: Mutex<PeerEventReceiver>,
}

impl MeshSession {
    /// Create a session
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(
        config: MeshConfig,
        factory: Arc<dyn PeerConnectionFactory>,
        channel: Arc<dyn SignalingChannel>,
    ) -> Result<Self> {
        config.validate()?;

        let signaling = SignalingHandle::new(channel, config.room_id.clone());
        let (registry, events) = PeerRegistry::new(&config, factory, signaling.clone());

        Ok(Self {
            config,
            signaling,
            registry: Arc::new(registry),
            events: Mutex::new(events),
        })
    }

    /// Configuration this session was built with
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Peer registry
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Supply the local identity
    ///
    /// Must happen before signaling events that create peers are handled.
    pub fn set_self_id(&self, id: &str) {
        info!(local_id = id, "Local identity set");
        self.registry.set_self_id(id);
    }

    /// Local identity, if set
    pub fn local_id(&self) -> Option<String> {
        self.registry.local_id()
    }

    /// Announce the local participant in the room
    pub fn join(&self) -> Result<()> {
        let local_id = self.registry.local_id().ok_or(Error::IdentityNotSet)?;
        info!(room_id = self.signaling.room_id(), local_id = %local_id, "Joining room");
        self.signaling.send_join(&local_id)
    }

    /// Route one inbound signaling event
    pub async fn handle_signal(&self, signal: InboundSignal) {
        debug!(event = signal.event_name(), from = ?signal.sender(), "Signal received");
        self.registry.route_signal(signal).await;
    }

    /// Dispatch one connection event
    ///
    /// Negotiation rounds and `failed` recovery run on their own tasks so
    /// their awaits and backoff sleeps never hold up signaling. Every other
    /// event is handled inline, in arrival order; a recovery task checks
    /// the live connection state before each attempt.
    pub async fn handle_peer_event(&self, event: PeerEvent) {
        match event.kind {
            PeerEventKind::NegotiationNeeded
            | PeerEventKind::ConnectionState(ConnectionState::Failed) => {
                let registry = Arc::clone(&self.registry);
                tokio::spawn(async move { registry.route_peer_event(event).await });
            }
            PeerEventKind::ConnectionState(_)
            | PeerEventKind::LocalCandidate(_)
            | PeerEventKind::Track(_) => {
                self.registry.route_peer_event(event).await;
            }
        }
    }

    /// Handle every queued connection event inline, in order
    ///
    /// For applications that drive the session without [`run`](Self::run).
    /// Returns the number of events handled, or zero while `run` is active.
    pub async fn drain_events(&self) -> usize {
        let Ok(mut events) = self.events.try_lock() else {
            return 0;
        };
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            self.registry.route_peer_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Process signaling and connection events until the signaling channel closes
    ///
    /// Inbound signals are handled one at a time in arrival order.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is already running.
    pub async fn run(&self, mut inbound: mpsc::UnboundedReceiver<InboundSignal>) -> Result<()> {
        let mut events = self
            .events
            .try_lock()
            .map_err(|_| Error::SignalingError("session is already running".to_string()))?;

        info!(room_id = self.signaling.room_id(), "Mesh session running");
        loop {
            tokio::select! {
                signal = inbound.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => {
                        info!("Signaling channel closed");
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_peer_event(event).await,
            }
        }
        Ok(())
    }

    /// Attach the local media source to every current and future peer
    pub async fn attach_local_stream(&self, source: LocalMediaSource) -> usize {
        self.registry.attach_local_stream(source).await
    }

    /// Mute or unmute the local track of `kind` without renegotiating
    pub fn toggle_track(&self, kind: TrackKind) -> Option<bool> {
        self.registry.toggle_track(kind)
    }

    /// Close every peer and leave the room
    pub async fn leave_all(&self) -> Result<()> {
        info!(room_id = self.signaling.room_id(), "Leaving room");
        self.registry.clear().await;
        self.signaling.send_leave()
    }

    /// Current peer id → remote stream mapping
    pub fn remote_streams(&self) -> PeerSnapshot {
        self.registry.snapshot()
    }

    /// Subscribe to changes of the peer id → remote stream mapping
    pub fn subscribe(&self) -> watch::Receiver<PeerSnapshot> {
        self.registry.subscribe()
    }
}

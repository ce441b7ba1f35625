//! In-memory meeting harness
//!
//! Wires several [`MeshSession`]s together through recording signaling
//! channels and mock connections so negotiation can run end to end without
//! a network:
//!
//! 1. Create participants with [`Participant::new`]
//! 2. Put them in a [`Room`]
//! 3. Drive delivery with [`Room::exchange`] (one round) or [`Room::settle`]
//!
//! A round first lets every participant handle its queued connection
//! events, then collects everything each participant sent, then delivers.
//! Offers produced in the same round therefore cross on the wire, which is
//! how glare is simulated.

#![allow(dead_code)]

use meeting_mesh::peer::mock::{MockConnection, MockConnectionFactory};
use meeting_mesh::signaling::RecordingChannel;
use meeting_mesh::{InboundSignal, MeshConfig, MeshSession, OutboundSignal};
use std::sync::Arc;

/// Initialize test logging (safe to call from every test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,meeting_mesh=debug")
        .with_test_writer()
        .try_init();
}

/// One simulated participant
pub struct Participant {
    pub id: String,
    pub session: MeshSession,
    pub channel: Arc<RecordingChannel>,
    pub factory: Arc<MockConnectionFactory>,
}

impl Participant {
    pub fn new(id: &str) -> Self {
        Self::with_config(id, MeshConfig::default().with_room("room"))
    }

    pub fn with_config(id: &str, config: MeshConfig) -> Self {
        let channel = Arc::new(RecordingChannel::new());
        let factory = MockConnectionFactory::new();
        let session = MeshSession::new(config.with_local_id(id), factory.clone(), channel.clone())
            .expect("valid harness config");
        Self {
            id: id.to_string(),
            session,
            channel,
            factory,
        }
    }

    /// Latest mock connection towards `peer_id`
    pub fn connection(&self, peer_id: &str) -> Arc<MockConnection> {
        self.factory
            .latest(peer_id)
            .unwrap_or_else(|| panic!("{} has no connection to {}", self.id, peer_id))
    }
}

/// Translate an outbound event into what the server delivers to its recipient
pub fn relay(from: &str, message: OutboundSignal) -> Option<(String, InboundSignal)> {
    match message {
        OutboundSignal::Offer { to, sdp, .. } => Some((
            to,
            InboundSignal::Offer {
                from: from.to_string(),
                sdp,
            },
        )),
        OutboundSignal::Answer { to, sdp, .. } => Some((
            to,
            InboundSignal::Answer {
                from: from.to_string(),
                sdp,
            },
        )),
        OutboundSignal::IceCandidate { to, candidate, .. } => Some((
            to,
            InboundSignal::IceCandidate {
                from: from.to_string(),
                candidate: Some(candidate),
            },
        )),
        OutboundSignal::Join { .. } | OutboundSignal::Leave { .. } => None,
    }
}

/// Participants sharing one simulated signaling server
pub struct Room {
    pub participants: Vec<Participant>,
}

impl Room {
    pub fn new(participants: Vec<Participant>) -> Self {
        Self { participants }
    }

    pub fn get(&self, id: &str) -> &Participant {
        self.participants
            .iter()
            .find(|p| p.id == id)
            .unwrap_or_else(|| panic!("no participant {}", id))
    }

    /// Announce every participant to every other one
    pub async fn introduce_all(&self) {
        for p in &self.participants {
            for other in &self.participants {
                if other.id != p.id {
                    p.session
                        .handle_signal(InboundSignal::UserJoined {
                            user_id: other.id.clone(),
                        })
                        .await;
                }
            }
        }
    }

    /// Run one delivery round; returns the number of messages delivered
    pub async fn exchange(&self) -> usize {
        for p in &self.participants {
            p.session.drain_events().await;
        }

        let mut in_flight = Vec::new();
        for p in &self.participants {
            for message in p.channel.drain() {
                if let Some(routed) = relay(&p.id, message) {
                    in_flight.push(routed);
                }
            }
        }

        let delivered = in_flight.len();
        for (to, signal) in in_flight {
            if let Some(recipient) = self.participants.iter().find(|p| p.id == to) {
                recipient.session.handle_signal(signal).await;
            }
        }
        delivered
    }

    /// Exchange until nothing is in flight; returns the number of rounds
    pub async fn settle(&self) -> usize {
        for round in 1..=32 {
            if self.exchange().await == 0 {
                return round;
            }
        }
        panic!("room did not settle");
    }
}

//! Signaling channel seam and room-scoped handle

pub mod protocol;
pub mod websocket;

pub use protocol::{InboundSignal, OutboundSignal};
pub use websocket::WebSocketSignaling;

use crate::peer::connection::{IceCandidate, SessionDescription};
use crate::Result;
use std::sync::Arc;
use tracing::trace;

/// Outbound half of a signaling transport
///
/// Sending is fire-and-forget: delivery order per recipient is the
/// transport's responsibility.
pub trait SignalingChannel: Send + Sync {
    /// Queue one event for delivery
    fn send(&self, message: OutboundSignal) -> Result<()>;
}

/// Room-scoped signaling handle
///
/// Owned by the session root and passed explicitly to every component
/// that emits events.
#[derive(Clone)]
pub struct SignalingHandle {
    channel: Arc<dyn SignalingChannel>,
    room_id: String,
}

impl std::fmt::Debug for SignalingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingHandle")
            .field("room_id", &self.room_id)
            .finish()
    }
}

impl SignalingHandle {
    /// Bind a channel to a room
    pub fn new(channel: Arc<dyn SignalingChannel>, room_id: impl Into<String>) -> Self {
        Self {
            channel,
            room_id: room_id.into(),
        }
    }

    /// Room this handle is scoped to
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    fn send(&self, message: OutboundSignal) -> Result<()> {
        trace!(event = message.event_name(), to = ?message.recipient(), "Signaling send");
        self.channel.send(message)
    }

    /// Announce the local participant
    pub fn send_join(&self, user_id: &str) -> Result<()> {
        self.send(OutboundSignal::Join {
            room_id: self.room_id.clone(),
            user_id: user_id.to_string(),
        })
    }

    /// Send an offer to `to`
    pub fn send_offer(&self, to: &str, sdp: SessionDescription) -> Result<()> {
        self.send(OutboundSignal::Offer {
            room_id: self.room_id.clone(),
            to: to.to_string(),
            sdp,
        })
    }

    /// Send an answer to `to`
    pub fn send_answer(&self, to: &str, sdp: SessionDescription) -> Result<()> {
        self.send(OutboundSignal::Answer {
            room_id: self.room_id.clone(),
            to: to.to_string(),
            sdp,
        })
    }

    /// Send a local ICE candidate to `to`
    pub fn send_ice_candidate(&self, to: &str, candidate: IceCandidate) -> Result<()> {
        self.send(OutboundSignal::IceCandidate {
            room_id: self.room_id.clone(),
            to: to.to_string(),
            candidate,
        })
    }

    /// Leave the room
    pub fn send_leave(&self) -> Result<()> {
        self.send(OutboundSignal::Leave {
            room_id: self.room_id.clone(),
        })
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use recording::RecordingChannel;

#[cfg(any(test, feature = "test-util"))]
mod recording {
    use super::{OutboundSignal, SignalingChannel};
    use crate::Result;
    use parking_lot::Mutex;

    /// Signaling channel that records every outbound event
    #[derive(Debug, Default)]
    pub struct RecordingChannel {
        sent: Mutex<Vec<OutboundSignal>>,
    }

    impl RecordingChannel {
        /// Empty recorder
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything sent so far
        pub fn sent(&self) -> Vec<OutboundSignal> {
            self.sent.lock().clone()
        }

        /// Remove and return everything sent so far
        pub fn drain(&self) -> Vec<OutboundSignal> {
            std::mem::take(&mut *self.sent.lock())
        }

        /// Offers sent to `to`
        pub fn offers_to(&self, to: &str) -> Vec<OutboundSignal> {
            self.sent
                .lock()
                .iter()
                .filter(|m| matches!(m, OutboundSignal::Offer { to: t, .. } if t == to))
                .cloned()
                .collect()
        }

        /// Answers sent to `to`
        pub fn answers_to(&self, to: &str) -> Vec<OutboundSignal> {
            self.sent
                .lock()
                .iter()
                .filter(|m| matches!(m, OutboundSignal::Answer { to: t, .. } if t == to))
                .cloned()
                .collect()
        }
    }

    impl SignalingChannel for RecordingChannel {
        fn send(&self, message: OutboundSignal) -> Result<()> {
            self.sent.lock().push(message);
            Ok(())
        }
    }
}

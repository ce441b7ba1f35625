//! Meeting signaling wire protocol
//!
//! Every frame is a JSON object `{"event": <name>, "data": {...}}`.

use crate::peer::connection::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

/// Events delivered by the signaling server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum InboundSignal {
    /// Local join acknowledged; current participants
    #[serde(rename = "meeting:joined")]
    Joined {
        /// Participants already in the room
        #[serde(default)]
        participants: Vec<String>,
    },

    /// Another participant joined
    #[serde(rename = "meeting:user-joined", rename_all = "camelCase")]
    UserJoined {
        /// Joining participant
        user_id: String,
    },

    /// A participant left
    #[serde(rename = "meeting:user-left", rename_all = "camelCase")]
    UserLeft {
        /// Departing participant
        user_id: String,
    },

    /// Authoritative participant list
    #[serde(rename = "meeting:roster")]
    Roster {
        /// Every participant currently expected in the room
        #[serde(default)]
        participants: Vec<String>,
    },

    /// SDP offer from a remote participant
    #[serde(rename = "meeting:offer")]
    Offer {
        /// Sender
        from: String,
        /// Offer description
        sdp: SessionDescription,
    },

    /// SDP answer from a remote participant
    #[serde(rename = "meeting:answer")]
    Answer {
        /// Sender
        from: String,
        /// Answer description
        sdp: SessionDescription,
    },

    /// Remote ICE candidate
    #[serde(rename = "meeting:ice")]
    IceCandidate {
        /// Sender
        from: String,
        /// Candidate, `null` for end-of-candidates
        #[serde(default)]
        candidate: Option<IceCandidate>,
    },
}

/// Events emitted towards the signaling server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum OutboundSignal {
    /// Join a room
    #[serde(rename = "meeting:join", rename_all = "camelCase")]
    Join {
        /// Room to join
        room_id: String,
        /// Local participant identity
        user_id: String,
    },

    /// SDP offer addressed to one participant
    #[serde(rename = "meeting:offer", rename_all = "camelCase")]
    Offer {
        /// Room scope
        room_id: String,
        /// Recipient
        to: String,
        /// Offer description
        sdp: SessionDescription,
    },

    /// SDP answer addressed to one participant
    #[serde(rename = "meeting:answer", rename_all = "camelCase")]
    Answer {
        /// Room scope
        room_id: String,
        /// Recipient
        to: String,
        /// Answer description
        sdp: SessionDescription,
    },

    /// Local ICE candidate addressed to one participant
    #[serde(rename = "meeting:ice", rename_all = "camelCase")]
    IceCandidate {
        /// Room scope
        room_id: String,
        /// Recipient
        to: String,
        /// Candidate
        candidate: IceCandidate,
    },

    /// Leave the room
    #[serde(rename = "meeting:leave", rename_all = "camelCase")]
    Leave {
        /// Room being left
        room_id: String,
    },
}

impl InboundSignal {
    /// Parse a frame
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to deserialize signaling message: {}",
                e
            ))
        })
    }

    /// Event name
    pub fn event_name(&self) -> &'static str {
        match self {
            InboundSignal::Joined { .. } => "meeting:joined",
            InboundSignal::UserJoined { .. } => "meeting:user-joined",
            InboundSignal::UserLeft { .. } => "meeting:user-left",
            InboundSignal::Roster { .. } => "meeting:roster",
            InboundSignal::Offer { .. } => "meeting:offer",
            InboundSignal::Answer { .. } => "meeting:answer",
            InboundSignal::IceCandidate { .. } => "meeting:ice",
        }
    }

    /// Sender of a peer-addressed message
    pub fn sender(&self) -> Option<&str> {
        match self {
            InboundSignal::Offer { from, .. }
            | InboundSignal::Answer { from, .. }
            | InboundSignal::IceCandidate { from, .. } => Some(from),
            _ => None,
        }
    }
}

impl OutboundSignal {
    /// Serialize a frame
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to serialize signaling message: {}",
                e
            ))
        })
    }

    /// Event name
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundSignal::Join { .. } => "meeting:join",
            OutboundSignal::Offer { .. } => "meeting:offer",
            OutboundSignal::Answer { .. } => "meeting:answer",
            OutboundSignal::IceCandidate { .. } => "meeting:ice",
            OutboundSignal::Leave { .. } => "meeting:leave",
        }
    }

    /// Recipient of a peer-addressed message
    pub fn recipient(&self) -> Option<&str> {
        match self {
            OutboundSignal::Offer { to, .. }
            | OutboundSignal::Answer { to, .. }
            | OutboundSignal::IceCandidate { to, .. } => Some(to),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_joined() {
        let msg = InboundSignal::from_json(
            r#"{"event":"meeting:joined","data":{"participants":["a","b"]}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            InboundSignal::Joined {
                participants: vec!["a".to_string(), "b".to_string()]
            }
        );
        assert_eq!(msg.event_name(), "meeting:joined");
    }

    #[test]
    fn test_parse_roster_without_participants() {
        let msg = InboundSignal::from_json(r#"{"event":"meeting:roster","data":{}}"#).unwrap();
        assert_eq!(msg, InboundSignal::Roster { participants: vec![] });
    }

    #[test]
    fn test_parse_user_left_camel_case() {
        let msg =
            InboundSignal::from_json(r#"{"event":"meeting:user-left","data":{"userId":"c"}}"#)
                .unwrap();
        assert_eq!(
            msg,
            InboundSignal::UserLeft {
                user_id: "c".to_string()
            }
        );
    }

    #[test]
    fn test_parse_offer() {
        let msg = InboundSignal::from_json(
            r#"{"event":"meeting:offer","data":{"from":"p","sdp":{"type":"offer","sdp":"v=0"}}}"#,
        )
        .unwrap();
        assert_eq!(msg.sender(), Some("p"));
        match msg {
            InboundSignal::Offer { sdp, .. } => assert_eq!(sdp, SessionDescription::offer("v=0")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_null_ice_candidate() {
        let msg = InboundSignal::from_json(
            r#"{"event":"meeting:ice","data":{"from":"p","candidate":null}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            InboundSignal::IceCandidate {
                from: "p".to_string(),
                candidate: None
            }
        );
    }

    #[test]
    fn test_unknown_event_is_error() {
        assert!(InboundSignal::from_json(r#"{"event":"stt.receive.message","data":{}}"#).is_err());
    }

    #[test]
    fn test_outbound_offer_wire_shape() {
        let msg = OutboundSignal::Offer {
            room_id: "r1".to_string(),
            to: "p".to_string(),
            sdp: SessionDescription::offer("v=0"),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "meeting:offer",
                "data": {"roomId": "r1", "to": "p", "sdp": {"type": "offer", "sdp": "v=0"}}
            })
        );
        assert_eq!(msg.recipient(), Some("p"));
    }

    #[test]
    fn test_outbound_leave_wire_shape() {
        let msg = OutboundSignal::Leave {
            room_id: "r1".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"event": "meeting:leave", "data": {"roomId": "r1"}}));
        assert_eq!(msg.recipient(), None);
    }
}

//! Error types for the mesh negotiation engine

/// Result type alias using the mesh Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing the peer mesh
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// ICE server list cannot be used to build a connection
    #[error("Invalid ICE configuration: {0}")]
    InvalidIceConfiguration(String),

    /// Local participant identity has not been supplied yet
    #[error("Local identity not set")]
    IdentityNotSet,

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Registry is at its maximum peer count
    #[error("Maximum peer limit reached ({0})")]
    PeerLimitReached(usize),

    /// Peer connection construction or lifecycle error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Operation attempted on a connection that is already closed
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// SDP negotiation error (description synthesis, commit or application)
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Rollback of a colliding local offer, or the remote offer that
    /// followed it, failed. The connection is in an unknown state.
    #[error("Rollback failed for peer {peer_id}: {reason}")]
    RollbackFailed {
        /// Remote peer whose connection must be torn down
        peer_id: String,
        /// Underlying failure
        reason: String,
    },

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_) | Error::InvalidIceConfiguration(_) | Error::IdentityNotSet
        )
    }

    /// Check if this error is a peer-related error
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerLimitReached(_)
                | Error::PeerConnectionError(_)
                | Error::ConnectionClosed(_)
                | Error::IceCandidateError(_)
                | Error::SdpError(_)
                | Error::RollbackFailed { .. }
        )
    }

    /// Check if the peer this error occurred on must be torn down
    ///
    /// Every other error abandons the current negotiation round only.
    pub fn requires_teardown(&self) -> bool {
        matches!(self, Error::RollbackFailed { .. })
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtcError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");

        let err = Error::PeerLimitReached(12);
        assert_eq!(err.to_string(), "Maximum peer limit reached (12)");
    }

    #[test]
    fn test_error_is_config_error() {
        assert!(Error::InvalidConfig("test".to_string()).is_config_error());
        assert!(Error::InvalidIceConfiguration("test".to_string()).is_config_error());
        assert!(Error::IdentityNotSet.is_config_error());
        assert!(!Error::SignalingError("test".to_string()).is_config_error());
    }

    #[test]
    fn test_error_is_peer_error() {
        assert!(Error::PeerLimitReached(2).is_peer_error());
        assert!(Error::SdpError("test".to_string()).is_peer_error());
        assert!(!Error::InvalidConfig("test".to_string()).is_peer_error());
    }

    #[test]
    fn test_only_rollback_failure_requires_teardown() {
        let rollback = Error::RollbackFailed {
            peer_id: "p".to_string(),
            reason: "boom".to_string(),
        };
        assert!(rollback.requires_teardown());
        assert!(!Error::SdpError("late".to_string()).requires_teardown());
        assert!(!Error::IceCandidateError("late".to_string()).requires_teardown());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::from(json_err);
        assert!(matches!(err, Error::SerializationError(_)));
    }
}

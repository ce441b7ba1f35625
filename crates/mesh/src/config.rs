//! Configuration types for the mesh session

pub use crate::peer::health::IceRestartPolicy;
use serde::{Deserialize, Deserializer, Serialize};

/// Default bound on simultaneous peer connections
pub const DEFAULT_MAX_PEERS: usize = 12;

/// Main configuration for a [`MeshSession`](crate::MeshSession)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// WebSocket signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// Room every outbound signaling event is scoped to
    pub room_id: String,

    /// Local participant identity (may also be supplied later via `set_self_id`)
    pub local_id: Option<String>,

    /// ICE servers handed to every new peer connection
    pub ice_servers: Vec<IceServerConfig>,

    /// Maximum peers in the mesh (default: 12)
    pub max_peers: usize,

    /// Recovery policy for failed connections
    pub ice_restart: IceRestartPolicy,
}

/// One ICE server descriptor, in the browser `RTCIceServer` shape
///
/// `urls` accepts either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// STUN/TURN URLs
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,

    /// Username for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

impl IceServerConfig {
    /// STUN server without credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// TURN server with credentials
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// Parse a JSON list of ICE server descriptors
    ///
    /// An empty string is treated as an empty list.
    ///
    /// # Example
    ///
    /// ```
    /// use meeting_mesh::config::IceServerConfig;
    ///
    /// let servers = IceServerConfig::list_from_json(
    ///     r#"[{"urls":"stun:stun.l.google.com:19302"},
    ///         {"urls":["turn:turn.example.com:3478"],"username":"u","credential":"p"}]"#,
    /// ).unwrap();
    /// assert_eq!(servers.len(), 2);
    /// assert_eq!(servers[1].username.as_deref(), Some("u"));
    /// ```
    pub fn list_from_json(json: &str) -> crate::Result<Vec<Self>> {
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        let servers: Vec<Self> = serde_json::from_str(json).map_err(|e| {
            crate::Error::InvalidIceConfiguration(format!("Failed to parse ICE server list: {}", e))
        })?;
        for server in &servers {
            server.validate()?;
        }
        Ok(servers)
    }

    /// Validate this descriptor
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `urls` is empty
    /// - a URL does not use the stun:, stuns:, turn: or turns: scheme
    /// - a TURN URL is present without both username and credential
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.urls.is_empty() {
            return Err(Error::InvalidIceConfiguration(
                "ICE server entry has no urls".to_string(),
            ));
        }

        for url in &self.urls {
            let scheme = url.split(':').next().unwrap_or_default();
            match scheme {
                "stun" | "stuns" => {}
                "turn" | "turns" => {
                    if self.username.is_none() || self.credential.is_none() {
                        return Err(Error::InvalidIceConfiguration(format!(
                            "TURN server {} requires username and credential",
                            url
                        )));
                    }
                }
                _ => {
                    return Err(Error::InvalidIceConfiguration(format!(
                        "unsupported ICE server url: {}",
                        url
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            room_id: "lobby".to_string(),
            local_id: None,
            ice_servers: vec![IceServerConfig::stun("stun:stun.l.google.com:19302")],
            max_peers: DEFAULT_MAX_PEERS,
            ice_restart: IceRestartPolicy::default(),
        }
    }
}

impl MeshConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - `room_id` is empty
    /// - `max_peers` is zero
    /// - `local_id` is set but empty
    /// - any ICE server descriptor is malformed
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.room_id.trim().is_empty() {
            return Err(Error::InvalidConfig("room_id must not be empty".to_string()));
        }

        if self.max_peers == 0 {
            return Err(Error::InvalidConfig(
                "max_peers must be at least 1".to_string(),
            ));
        }

        if matches!(self.local_id.as_deref(), Some(id) if id.is_empty()) {
            return Err(Error::InvalidConfig(
                "local_id must not be empty".to_string(),
            ));
        }

        for server in &self.ice_servers {
            server.validate()?;
        }

        self.ice_restart.validate()?;

        Ok(())
    }

    /// Set the room for this configuration
    pub fn with_room(mut self, room_id: &str) -> Self {
        self.room_id = room_id.to_string();
        self
    }

    /// Set the local participant identity
    pub fn with_local_id(mut self, local_id: &str) -> Self {
        self.local_id = Some(local_id.to_string());
        self
    }

    /// Replace the ICE server list
    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServerConfig>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    /// Set the maximum number of peers
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Replace the ICE restart policy
    pub fn with_ice_restart(mut self, policy: IceRestartPolicy) -> Self {
        self.ice_restart = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MeshConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_peers, DEFAULT_MAX_PEERS);
    }

    #[test]
    fn test_invalid_signaling_url_fails() {
        let mut config = MeshConfig::default();
        config.signaling_url = "http://localhost:8080".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_peers_fails() {
        let config = MeshConfig::default().with_max_peers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_room_fails() {
        let config = MeshConfig::default().with_room("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_local_id_fails() {
        let config = MeshConfig::default().with_local_id("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_turn_without_credentials_fails() {
        let server = IceServerConfig {
            urls: vec!["turn:turn.example.com:3478".to_string()],
            username: None,
            credential: None,
        };
        assert!(server.validate().is_err());

        let config = MeshConfig::default().with_ice_servers(vec![server]);
        assert!(matches!(
            config.validate(),
            Err(crate::Error::InvalidIceConfiguration(_))
        ));
    }

    #[test]
    fn test_unknown_scheme_fails() {
        let server = IceServerConfig::stun("http://stun.example.com");
        assert!(server.validate().is_err());
    }

    #[test]
    fn test_ice_list_accepts_string_or_array_urls() {
        let servers = IceServerConfig::list_from_json(
            r#"[{"urls":"stun:a.example.com:3478"},{"urls":["stun:b.example.com","stuns:c.example.com"]}]"#,
        )
        .unwrap();
        assert_eq!(servers[0].urls, vec!["stun:a.example.com:3478".to_string()]);
        assert_eq!(servers[1].urls.len(), 2);
    }

    #[test]
    fn test_ice_list_empty_and_malformed() {
        assert!(IceServerConfig::list_from_json("").unwrap().is_empty());
        assert!(IceServerConfig::list_from_json("[]").unwrap().is_empty());
        assert!(IceServerConfig::list_from_json("{not json").is_err());
        assert!(IceServerConfig::list_from_json(r#"[{"urls":[]}]"#).is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = MeshConfig::default().with_local_id("alice");
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: MeshConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.signaling_url, deserialized.signaling_url);
        assert_eq!(deserialized.local_id.as_deref(), Some("alice"));
        assert_eq!(config.ice_servers, deserialized.ice_servers);
    }

    #[test]
    fn test_builder_chain() {
        let config = MeshConfig::default()
            .with_room("standup")
            .with_local_id("bob")
            .with_max_peers(4)
            .with_ice_servers(vec![IceServerConfig::turn(
                "turns:turn.example.com:5349",
                "user",
                "pass",
            )]);
        assert!(config.validate().is_ok());
        assert_eq!(config.room_id, "standup");
        assert_eq!(config.max_peers, 4);
    }
}

//! Local and remote media handles
//!
//! The engine never captures media itself. The embedding application hands
//! it a [`LocalMediaSource`] whose tracks are fanned out to every peer by the
//! [`LocalTrackBinder`], and reads remote media from the [`RemoteStream`]s
//! published in the registry snapshot.

use crate::peer::connection::MediaConnection;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl TrackKind {
    /// Map a webrtc-rs codec type; `Unspecified` has no kind
    pub fn from_codec_type(codec_type: RTPCodecType) -> Option<Self> {
        match codec_type {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Outbound media track shared by every peer connection
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    rtp: Arc<TrackLocalStaticSample>,
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl LocalTrack {
    /// Wrap an existing sample track
    pub fn new(kind: TrackKind, rtp: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            id: rtp.id().to_string(),
            kind,
            enabled: AtomicBool::new(true),
            rtp,
        }
    }

    /// Opus audio track (48 kHz stereo)
    pub fn audio(id: &str, stream_id: &str) -> Arc<Self> {
        let rtp = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            id.to_string(),
            stream_id.to_string(),
        ));
        Arc::new(Self::new(TrackKind::Audio, rtp))
    }

    /// VP8 video track (90 kHz clock)
    pub fn video(id: &str, stream_id: &str) -> Arc<Self> {
        let rtp = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            id.to_string(),
            stream_id.to_string(),
        ));
        Arc::new(Self::new(TrackKind::Video, rtp))
    }

    /// Track identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Media kind
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Underlying webrtc-rs track, as handed to `add_track`
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtp)
    }

    /// Whether samples are currently forwarded
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Set the enabled flag
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flip the enabled flag, returning the new value
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    /// Write one media sample to every connection carrying this track
    ///
    /// Returns `Ok(false)` when the track is disabled (muted) and the
    /// sample was dropped.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        self.rtp
            .write_sample(sample)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write sample: {}", e)))?;
        Ok(true)
    }
}

/// Opaque local media source: zero or more audio/video tracks
#[derive(Debug, Clone, Default)]
pub struct LocalMediaSource {
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalMediaSource {
    /// Source with the given tracks
    pub fn new(tracks: Vec<Arc<LocalTrack>>) -> Self {
        Self { tracks }
    }

    /// All tracks
    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    /// First track of the given kind
    pub fn track(&self, kind: TrackKind) -> Option<&Arc<LocalTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }
}

/// Inbound media track delivered by a connection
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    /// Track identifier
    pub id: String,
    /// Stream the track belongs to
    pub stream_id: String,
    /// Media kind
    pub kind: TrackKind,
    /// webrtc-rs handle for reading RTP (absent for in-memory connections)
    pub handle: Option<Arc<TrackRemote>>,
}

/// Most recent remote stream of a peer
///
/// Immutable: every inbound track produces a new value that replaces the
/// previous one.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    /// Stream identifier
    pub id: String,
    /// Tracks in arrival order
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    /// Build the stream that results from `track` arriving after `previous`
    ///
    /// Tracks of the same stream id are carried over; a track with the same
    /// id replaces the earlier one.
    pub fn with_track(previous: Option<&RemoteStream>, track: RemoteTrack) -> Self {
        let mut tracks: Vec<RemoteTrack> = match previous {
            Some(prev) if prev.id == track.stream_id => prev
                .tracks
                .iter()
                .filter(|t| t.id != track.id)
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        let id = track.stream_id.clone();
        tracks.push(track);
        Self { id, tracks }
    }

    /// First track of the given kind
    pub fn track(&self, kind: TrackKind) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }
}

/// Attaches the local media source to current and future connections
#[derive(Debug, Default)]
pub struct LocalTrackBinder {
    source: RwLock<Option<LocalMediaSource>>,
}

impl LocalTrackBinder {
    /// Binder with no source attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored source (`None` detaches it for future peers)
    pub fn set_source(&self, source: Option<LocalMediaSource>) {
        *self.source.write() = source;
    }

    /// Currently attached source
    pub fn source(&self) -> Option<LocalMediaSource> {
        self.source.read().clone()
    }

    /// Add every attached track whose kind is not already sent on `connection`
    ///
    /// Returns the number of tracks added. Individual add failures are
    /// logged and skipped.
    pub async fn bind(&self, peer_id: &str, connection: &dyn MediaConnection) -> usize {
        let Some(source) = self.source() else {
            return 0;
        };

        let mut sending = connection.sender_kinds().await;
        let mut added = 0;

        for track in source.tracks() {
            if sending.contains(&track.kind()) {
                continue;
            }
            match connection.add_track(Arc::clone(track)).await {
                Ok(()) => {
                    debug!(peer_id, kind = %track.kind(), track_id = track.id(), "Local track attached");
                    sending.push(track.kind());
                    added += 1;
                }
                Err(e) => warn!(peer_id, kind = %track.kind(), "Failed to add local track: {}", e),
            }
        }

        added
    }

    /// Flip the enabled flag of the local track of `kind` without renegotiating
    ///
    /// Returns the new enabled state, or `None` if no such track is attached.
    pub fn toggle_track(&self, kind: TrackKind) -> Option<bool> {
        let guard = self.source.read();
        let track = guard.as_ref()?.track(kind)?;
        let enabled = track.toggle();
        debug!(kind = %kind, enabled, "Local track toggled");
        Some(enabled)
    }
}

//! Media engine interface.
//!
//! The crate drives the underlying WebRTC/audio stack through this narrow
//! command-and-event seam and never touches media internals. A platform
//! integration implements [`MediaEngine`] and feeds [`EngineEvent`]s into
//! the channel handed to the session at construction.

use crate::envelope::{IceCandidate, SdpDescriptor};
use crate::error::EngineError;
use crate::types::{ConnectionState, IceServer, IceState};
use async_trait::async_trait;

/// Events emitted by the media engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A local ICE candidate was gathered and should be signaled to the peer.
    LocalCandidate(IceCandidate),
    /// Aggregate connection state changed.
    ConnectionStateChanged(ConnectionState),
    /// ICE-layer state changed.
    IceStateChanged(IceState),
    /// The remote audio track arrived.
    RemoteTrack,
}

/// Commands the session issues to the media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Verify audio capture is available. A denial is fatal to the call.
    async fn ensure_audio_capture(&self) -> Result<(), EngineError>;

    /// Apply (or re-apply) the ICE server set.
    async fn apply_ice_servers(&self, servers: &[IceServer]) -> Result<(), EngineError>;

    /// Create an audio-only offer. `ice_restart` requests fresh credentials
    /// for a mid-call ICE restart.
    async fn create_offer(&self, ice_restart: bool) -> Result<SdpDescriptor, EngineError>;

    /// Create an answer for the currently applied remote offer.
    async fn create_answer(&self) -> Result<SdpDescriptor, EngineError>;

    async fn set_local_description(&self, desc: &SdpDescriptor) -> Result<(), EngineError>;

    async fn set_remote_description(&self, desc: &SdpDescriptor) -> Result<(), EngineError>;

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), EngineError>;

    fn connection_state(&self) -> ConnectionState;

    fn ice_state(&self) -> IceState;

    /// Whether the signaling layer is in the stable state (no offer/answer
    /// exchange half-finished). Re-offers are only issued when stable.
    fn signaling_stable(&self) -> bool;

    /// Hint the transport to restart ICE gathering.
    async fn restart_ice(&self);

    async fn set_mic_enabled(&self, enabled: bool);

    /// Tear the media path down. Idempotent.
    async fn close(&self);
}

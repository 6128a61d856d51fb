//! REST signaling fallback surface.
//!
//! The HTTP collaborator mirrors the server's call endpoints. Implementations
//! live in the host application; this crate only defines the seam and the
//! ordering discipline (all side-effecting calls go through the dedicated
//! signaling worker, see `worker.rs`).

use crate::types::{CallResponse, IceServer};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait RestClient: Send + Sync {
    /// Fetch a pending offer payload left for us by `peer_id`, if any.
    async fn fetch_call_offer(&self, peer_id: &str) -> Result<Option<String>>;

    /// Deliver our answer payload to `peer_id`.
    async fn submit_answer(&self, peer_id: &str, answer_b64: &str) -> Result<()>;

    /// Deliver one local ICE candidate payload to `peer_id`.
    async fn submit_candidate(&self, peer_id: &str, candidate_b64: &str) -> Result<()>;

    /// Fetch the answer payload left for us by `peer_id`, if any.
    async fn fetch_call_answer(&self, peer_id: &str) -> Result<Option<String>>;

    /// Fetch remote candidate payloads queued since `since_epoch_secs`.
    async fn fetch_candidates_since(
        &self,
        peer_id: &str,
        since_epoch_secs: i64,
    ) -> Result<Vec<String>>;

    /// Record our terminal response to the call (accepted/rejected/ended).
    async fn submit_call_response(&self, peer_id: &str, response: CallResponse) -> Result<()>;

    /// Check whether the peer recorded a response to our call.
    async fn check_call_response(&self, peer_id: &str) -> Result<Option<CallResponse>>;

    /// Ask the server to push a call notification to the peer's devices.
    async fn send_call_notification(&self, peer_id: &str, call_type: &str) -> Result<()>;

    /// Fetch per-user TURN credentials with the given TTL.
    async fn fetch_turn_credentials(&self, user_id: &str, ttl_minutes: u32)
    -> Result<Vec<IceServer>>;

    /// Fetch the static TURN/STUN configuration.
    async fn fetch_turn_config(&self) -> Result<Vec<IceServer>>;
}

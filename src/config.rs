//! Session configuration.

use std::time::Duration;

/// Tunables for a call session.
///
/// Defaults mirror the production client: offer fetch retries every 600 ms
/// up to 50 times, a 1.2 s wait for the persistent channel to authenticate
/// before falling back to HTTP, 2 s signaling polls, and a recovery loop
/// ticking every 5 s with a 120 s grace period.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Maximum offer-fetch attempts for an accepted incoming call.
    pub offer_retry_max: u32,
    /// Delay between offer-fetch attempts.
    pub offer_retry_delay: Duration,
    /// How long to wait for persistent-channel auth before forcing HTTP.
    pub auth_wait: Duration,
    /// Re-check interval while waiting for channel auth to send an offer.
    pub auth_recheck: Duration,
    /// Interval of the answer/response/ICE pollers.
    pub poll_interval: Duration,
    /// Outgoing calls: polls without an answer before the call is treated
    /// as unanswered and torn down.
    pub answer_poll_max: u32,
    /// Recovery tick interval.
    pub recovery_tick: Duration,
    /// Recovery grace period before the call is forced down.
    pub recovery_grace: Duration,
    /// Maximum ICE-restart re-offers per session.
    pub recovery_max_attempts: u32,
    /// Window in which a repeated incoming invocation for the same peer is
    /// treated as a duplicate.
    pub incoming_dedup_window: Duration,
    /// Delay between the call going active and the initial media-state send.
    pub media_state_delay: Duration,
    /// TTL requested for per-user TURN credentials.
    pub turn_ttl_minutes: u32,
    /// STUN server used when no TURN/STUN config could be fetched.
    pub stun_fallback_url: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        let offer_retry_delay = Duration::from_millis(600);
        Self {
            offer_retry_max: 50,
            offer_retry_delay,
            auth_wait: offer_retry_delay * 2,
            auth_recheck: Duration::from_millis(300),
            poll_interval: Duration::from_secs(2),
            answer_poll_max: 90,
            recovery_tick: Duration::from_secs(5),
            recovery_grace: Duration::from_secs(120),
            recovery_max_attempts: 6,
            incoming_dedup_window: Duration::from_millis(1500),
            media_state_delay: Duration::from_millis(500),
            turn_ttl_minutes: 60,
            stun_fallback_url: "stun:stun.l.google.com:19302".to_string(),
        }
    }
}

impl CallConfig {
    /// A configuration with aggressively short timings, for tests that walk
    /// the retry and recovery paths without real-world waits.
    pub fn fast() -> Self {
        Self {
            offer_retry_max: 5,
            offer_retry_delay: Duration::from_millis(10),
            auth_wait: Duration::from_millis(20),
            auth_recheck: Duration::from_millis(5),
            poll_interval: Duration::from_millis(15),
            answer_poll_max: 4,
            recovery_tick: Duration::from_millis(25),
            recovery_grace: Duration::from_millis(250),
            recovery_max_attempts: 3,
            incoming_dedup_window: Duration::from_millis(100),
            media_state_delay: Duration::from_millis(5),
            ..Self::default()
        }
    }
}

//! Core call types shared across the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

impl CallDirection {
    pub fn is_incoming(&self) -> bool {
        matches!(self, Self::Incoming)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

/// Why a session ended.
///
/// `Rejected`, `Cancelled` and `Missed` are the explicit reasons carried on
/// the wire by `call_end` / call-response exchanges; the rest are produced
/// locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Local user hung up.
    UserEnded,
    /// Remote peer ended an answered call.
    RemoteEnded,
    Rejected,
    Cancelled,
    Missed,
    /// Incoming call accepted but no offer ever became available.
    NoOffer,
    /// Outgoing call: answer never arrived.
    NoAnswer,
    /// Recovery grace period expired without the media path coming back.
    ConnectionLost,
    /// SDP create/apply failed.
    NegotiationFailed,
    /// Microphone capture unavailable.
    PermissionDenied,
    /// Remote signaled `call_error`.
    RemoteError,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserEnded => "user_ended",
            Self::RemoteEnded => "remote_ended",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Missed => "missed",
            Self::NoOffer => "no_offer",
            Self::NoAnswer => "no_answer",
            Self::ConnectionLost => "connection_lost",
            Self::NegotiationFailed => "negotiation_failed",
            Self::PermissionDenied => "permission_denied",
            Self::RemoteError => "remote_error",
        }
    }
}

/// Terminal status recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ended,
    Rejected,
    Cancelled,
    Missed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ended => "ended",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Missed => "missed",
        }
    }
}

/// Aggregate connection state reported by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// ICE-layer connection state reported by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// One STUN/TURN server entry handed to the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Media flag carried by `call_media_state` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Mic,
    Speaker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mic => "mic",
            Self::Speaker => "speaker",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "mic" => Some(Self::Mic),
            "speaker" => Some(Self::Speaker),
            _ => None,
        }
    }
}

/// Call-response values exchanged over the REST fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallResponse {
    Accepted,
    Rejected,
    Ended,
}

impl CallResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Ended => "ended",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

/// Generate a fresh call id: 16 random bytes, upper-hex.
pub fn generate_call_id() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::rng().random();
    let mut out = String::with_capacity(32);
    for b in bytes {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

/// One record in the call log, written exactly once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLogEntry {
    pub peer_id: String,
    pub peer_name: String,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,
}

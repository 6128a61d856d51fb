//! Persistent-channel messages.
//!
//! Inbound: parsing of the `call_*` JSON messages delivered by the push
//! channel. Outbound: frame builders plus [`PushSender`], the seam to the
//! channel client. `PushSender::send` enqueues and reports acceptance; a
//! refused enqueue (or an unauthenticated channel) is what triggers the
//! one-way HTTP fallback in the channel selector.

use crate::types::MediaKind;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Parsed inbound call message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    CallOffer {
        #[serde(default)]
        from_user_id: Option<String>,
        #[serde(default)]
        from_username: Option<String>,
        offer: String,
    },
    CallAnswer {
        #[serde(default)]
        from_user_id: Option<String>,
        answer: String,
    },
    CallIceCandidate {
        #[serde(default)]
        from_user_id: Option<String>,
        candidate: String,
    },
    CallMediaState {
        #[serde(default)]
        from_user_id: Option<String>,
        media_type: String,
        #[serde(default)]
        enabled: Option<bool>,
    },
    CallEnd {},
    CallError {
        #[serde(default)]
        error_message: Option<String>,
    },
}

impl PushEvent {
    /// Parse a raw channel message. Returns `None` for messages that are not
    /// call signaling (the channel multiplexes other traffic).
    pub fn parse(raw: &Value) -> Option<Self> {
        serde_json::from_value(raw.clone()).ok()
    }

    pub fn from_user(&self) -> Option<&str> {
        match self {
            Self::CallOffer { from_user_id, .. }
            | Self::CallAnswer { from_user_id, .. }
            | Self::CallIceCandidate { from_user_id, .. }
            | Self::CallMediaState { from_user_id, .. } => from_user_id.as_deref(),
            Self::CallEnd {} | Self::CallError { .. } => None,
        }
    }
}

/// Seam to the persistent-channel client.
pub trait PushSender: Send + Sync {
    /// Whether the channel is connected and authenticated.
    fn is_ready(&self) -> bool;

    /// Enqueue a frame. Returns `false` if the frame was not accepted.
    fn send(&self, frame: Value) -> bool;
}

/// Outbound call-signaling frames over the persistent channel.
#[derive(Clone)]
pub struct PushSignals {
    sender: Arc<dyn PushSender>,
}

impl PushSignals {
    pub fn new(sender: Arc<dyn PushSender>) -> Self {
        Self { sender }
    }

    pub fn is_ready(&self) -> bool {
        self.sender.is_ready()
    }

    pub fn send_offer(&self, peer_id: &str, call_type: &str, sdp_b64: &str) -> bool {
        self.sender.send(json!({
            "type": "call_offer",
            "target_user_id": peer_id,
            "receiver_id": peer_id,
            "call_type": call_type,
            "offer": sdp_b64,
            "offer_encoding": "b64",
        }))
    }

    pub fn send_answer(&self, peer_id: &str, sdp_b64: &str) -> bool {
        self.sender.send(json!({
            "type": "call_answer",
            "target_user_id": peer_id,
            "receiver_id": peer_id,
            "answer": sdp_b64,
            "answer_encoding": "b64",
        }))
    }

    pub fn send_ice(&self, peer_id: &str, candidate_b64: &str) -> bool {
        self.sender.send(json!({
            "type": "call_ice_candidate",
            "target_user_id": peer_id,
            "receiver_id": peer_id,
            "candidate": candidate_b64,
            "candidate_encoding": "b64",
        }))
    }

    pub fn send_end(&self, peer_id: &str) -> bool {
        self.sender.send(json!({
            "type": "call_end",
            "target_user_id": peer_id,
        }))
    }

    pub fn send_media_state(&self, peer_id: &str, media: MediaKind, enabled: bool) -> bool {
        self.sender.send(json!({
            "type": "call_media_state",
            "target_user_id": peer_id,
            "media_type": media.as_str(),
            "enabled": enabled,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturingSender {
        frames: Mutex<Vec<Value>>,
    }

    impl PushSender for CapturingSender {
        fn is_ready(&self) -> bool {
            true
        }

        fn send(&self, frame: Value) -> bool {
            self.frames.lock().unwrap().push(frame);
            true
        }
    }

    #[test]
    fn test_parse_offer() {
        let raw = json!({
            "type": "call_offer",
            "from_user_id": "u-42",
            "from_username": "ada",
            "offer": "b64payload",
        });
        match PushEvent::parse(&raw) {
            Some(PushEvent::CallOffer {
                from_user_id,
                from_username,
                offer,
            }) => {
                assert_eq!(from_user_id.as_deref(), Some("u-42"));
                assert_eq!(from_username.as_deref(), Some("ada"));
                assert_eq!(offer, "b64payload");
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn test_parse_end_and_error() {
        assert!(matches!(
            PushEvent::parse(&json!({"type": "call_end"})),
            Some(PushEvent::CallEnd {})
        ));
        assert!(matches!(
            PushEvent::parse(&json!({"type": "call_error", "error_message": "busy"})),
            Some(PushEvent::CallError { error_message: Some(m) }) if m == "busy"
        ));
    }

    #[test]
    fn test_parse_foreign_message() {
        assert!(PushEvent::parse(&json!({"type": "chat_message", "body": "hi"})).is_none());
    }

    #[test]
    fn test_outbound_frames_carry_encoding_markers() {
        let sender = Arc::new(CapturingSender {
            frames: Mutex::new(Vec::new()),
        });
        let signals = PushSignals::new(sender.clone());
        assert!(signals.send_offer("peer-1", "audio", "AAA"));
        assert!(signals.send_answer("peer-1", "BBB"));
        assert!(signals.send_ice("peer-1", "CCC"));
        assert!(signals.send_media_state("peer-1", MediaKind::Mic, false));
        assert!(signals.send_end("peer-1"));

        let frames = sender.frames.lock().unwrap();
        assert_eq!(frames[0]["type"], "call_offer");
        assert_eq!(frames[0]["offer_encoding"], "b64");
        assert_eq!(frames[1]["answer_encoding"], "b64");
        assert_eq!(frames[2]["candidate_encoding"], "b64");
        assert_eq!(frames[3]["media_type"], "mic");
        assert_eq!(frames[3]["enabled"], false);
        assert_eq!(frames[4]["type"], "call_end");
        assert!(frames.iter().all(|f| f["target_user_id"] == "peer-1"));
    }
}

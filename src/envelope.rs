//! Wire envelopes for SDP descriptors and ICE candidates.
//!
//! Outbound payloads are canonical: JSON, then base64. Inbound payloads are
//! decoded tolerantly because peers and older clients disagree on details:
//! the decoder accepts base64-wrapped JSON, bare JSON, JSON wrapped in an
//! extra layer of quotes, snake_case candidate keys, and raw `v=` /
//! `candidate:` strings.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

/// Which side of the offer/answer exchange a descriptor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            _ => None,
        }
    }
}

/// An SDP session description. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpDescriptor {
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Serialize, Deserialize)]
struct SdpWire {
    #[serde(rename = "type")]
    kind: String,
    sdp: String,
}

impl SdpDescriptor {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Encode as the wire envelope: base64 of `{"type": ..., "sdp": ...}`.
    pub fn encode(&self) -> String {
        let wire = SdpWire {
            kind: self.kind.as_str().to_string(),
            sdp: self.sdp.clone(),
        };
        // Serialization of two string fields cannot fail.
        let json = serde_json::to_string(&wire).unwrap_or_default();
        STANDARD.encode(json.as_bytes())
    }

    /// Decode a wire payload. `fallback` supplies the descriptor kind when
    /// the payload omits or mangles its `type` field.
    pub fn decode(raw: &str, fallback: SdpKind) -> Option<Self> {
        let normalized = normalize_payload(raw)?;
        if looks_like_json(&normalized) {
            if let Ok(wire) = serde_json::from_str::<SdpWire>(&normalized) {
                let kind = SdpKind::from_wire(&wire.kind).unwrap_or(fallback);
                return Some(Self {
                    kind,
                    sdp: wire.sdp,
                });
            }
            // Type field missing entirely: accept a bare {"sdp": ...}.
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&normalized)
                && let Some(sdp) = value.get("sdp").and_then(|v| v.as_str())
            {
                return Some(Self {
                    kind: fallback,
                    sdp: sdp.to_string(),
                });
            }
            return None;
        }
        if looks_like_sdp(&normalized) {
            return Some(Self {
                kind: fallback,
                sdp: normalized,
            });
        }
        None
    }
}

/// A single ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub sdp_mid: String,
    pub sdp_mline_index: u32,
    pub candidate: String,
}

#[derive(Serialize)]
struct CandidateWire<'a> {
    #[serde(rename = "sdpMid")]
    sdp_mid: &'a str,
    #[serde(rename = "sdpMLineIndex")]
    sdp_mline_index: u32,
    candidate: &'a str,
}

impl IceCandidate {
    pub fn new(sdp_mid: impl Into<String>, sdp_mline_index: u32, candidate: impl Into<String>) -> Self {
        Self {
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
            candidate: candidate.into(),
        }
    }

    /// Composite key used to deduplicate outbound transmissions.
    pub fn dedup_key(&self) -> String {
        format!("{}|{}|{}", self.sdp_mid, self.sdp_mline_index, self.candidate)
    }

    /// Encode as the wire envelope: base64 of
    /// `{"sdpMid": ..., "sdpMLineIndex": ..., "candidate": ...}`.
    pub fn encode(&self) -> String {
        let wire = CandidateWire {
            sdp_mid: &self.sdp_mid,
            sdp_mline_index: self.sdp_mline_index,
            candidate: &self.candidate,
        };
        let json = serde_json::to_string(&wire).unwrap_or_default();
        STANDARD.encode(json.as_bytes())
    }

    /// Decode a wire payload, accepting camelCase or snake_case keys, string
    /// or numeric line indices, and a bare `candidate:` string.
    pub fn decode(raw: &str) -> Option<Self> {
        let normalized = normalize_payload(raw)?;
        if !looks_like_json(&normalized) {
            if normalized.contains("candidate:") {
                return Some(Self::new("0", 0, normalized));
            }
            return None;
        }
        let value: serde_json::Value = serde_json::from_str(&normalized).ok()?;
        let candidate = value.get("candidate")?.as_str()?.to_string();
        let sdp_mid = value
            .get("sdpMid")
            .or_else(|| value.get("sdp_mid"))
            .and_then(|v| v.as_str())
            .unwrap_or("0")
            .to_string();
        let sdp_mline_index = value
            .get("sdpMLineIndex")
            .or_else(|| value.get("sdp_mline_index"))
            .map(|v| {
                v.as_u64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                    .unwrap_or(0) as u32
            })
            .unwrap_or(0);
        Some(Self {
            sdp_mid,
            sdp_mline_index,
            candidate,
        })
    }
}

/// Strip an optional quote wrapper, then try to peel one base64 layer.
fn normalize_payload(raw: &str) -> Option<String> {
    let trimmed = unwrap_quoted(raw.trim());
    if trimmed.is_empty() {
        return None;
    }
    if looks_like_json(trimmed) {
        return Some(trimmed.to_string());
    }
    if let Some(decoded) = try_decode_base64(trimmed) {
        let inner = unwrap_quoted(decoded.trim()).to_string();
        if !inner.is_empty() {
            return Some(inner);
        }
    }
    Some(trimmed.to_string())
}

fn unwrap_quoted(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn looks_like_json(value: &str) -> bool {
    value.starts_with('{') || value.starts_with('[')
}

fn looks_like_sdp(value: &str) -> bool {
    value.starts_with("v=") || value.contains("\nv=") || value.contains("\r\nv=")
}

fn try_decode_base64(raw: &str) -> Option<String> {
    let bytes = STANDARD
        .decode(raw)
        .or_else(|_| URL_SAFE_NO_PAD.decode(raw))
        .ok()?;
    String::from_utf8(bytes).ok()
}

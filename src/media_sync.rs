//! Best-effort media state broadcast.
//!
//! Once a call is active each side tells the other about mic/speaker flips
//! so the remote UI can show a "muted" badge. Purely informational: no ack,
//! no retry, and only the persistent channel carries it (the REST surface
//! has no media-state endpoint, so with an HTTP-locked session the message
//! is simply skipped).

use crate::channel::SignalChannel;
use crate::push::PushSignals;
use crate::types::MediaKind;
use log::debug;
use std::sync::Mutex;

/// Remote peer's media flags, as last reported.
#[derive(Debug, Clone, Copy)]
pub struct RemoteMediaState {
    pub mic_enabled: bool,
    pub speaker_enabled: bool,
}

impl Default for RemoteMediaState {
    fn default() -> Self {
        Self {
            mic_enabled: true,
            speaker_enabled: true,
        }
    }
}

pub struct MediaStateSynchronizer {
    peer_id: String,
    push: PushSignals,
    remote: Mutex<RemoteMediaState>,
}

impl MediaStateSynchronizer {
    pub fn new(peer_id: String, push: PushSignals) -> Self {
        Self {
            peer_id,
            push,
            remote: Mutex::new(RemoteMediaState::default()),
        }
    }

    /// Send one flag to the peer over the resolved channel, best effort.
    pub fn send(&self, resolved: SignalChannel, media: MediaKind, enabled: bool) {
        match resolved {
            SignalChannel::Persistent => {
                if !self.push.send_media_state(&self.peer_id, media, enabled) {
                    debug!("media state: enqueue refused, dropped");
                }
            }
            SignalChannel::Http => {
                debug!("media state: no http endpoint, skipped");
            }
        }
    }

    /// Record an inbound `call_media_state`. Returns the parsed flag for the
    /// event bus, or `None` for an unknown media type.
    pub fn note_remote(&self, media_type: &str, enabled: bool) -> Option<MediaKind> {
        let media = MediaKind::from_wire(media_type)?;
        let mut remote = self.remote.lock().unwrap();
        match media {
            MediaKind::Mic => remote.mic_enabled = enabled,
            MediaKind::Speaker => remote.speaker_enabled = enabled,
        }
        Some(media)
    }

    pub fn remote_state(&self) -> RemoteMediaState {
        *self.remote.lock().unwrap()
    }

    /// Reset remote flags to their defaults when a call (re)activates.
    pub fn reset_remote(&self) {
        *self.remote.lock().unwrap() = RemoteMediaState::default();
    }
}

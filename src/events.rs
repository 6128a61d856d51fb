//! Session events observed by the UI.
//!
//! The controller publishes over a broadcast channel; the UI (and anything
//! else that cares) subscribes and renders. Events fire only on actual
//! changes, so re-entering a phase never double-triggers a side effect like
//! starting a ringtone.

use crate::phase::CallPhase;
use crate::types::MediaKind;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved to a new phase.
    PhaseChanged(CallPhase),
    /// The remote peer toggled a media flag.
    RemoteMediaChanged { media: MediaKind, enabled: bool },
    /// Transient mid-call connectivity loss; recovery running.
    Reconnecting,
    /// Terminal failure with a user-facing message.
    CallFailed { message: String },
    /// The call-start notification could not be delivered (outgoing only).
    NotificationFailed,
}

/// Broadcast fan-out for session events.
#[derive(Debug)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish. Lagging or absent receivers are fine; events are
    /// informational.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

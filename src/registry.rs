//! Process-wide call admission.
//!
//! One `CallRegistry` is created at process start and shared by reference
//! with every screen/controller that can spawn a call. It replaces what used
//! to be global statics: the "a call is already in progress" flag and the
//! repeat-invocation dedup for incoming pushes (the same `call_offer` can be
//! delivered through both the notification path and the channel within a
//! short window).

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct CallRegistry {
    in_progress: AtomicBool,
    last_incoming: Mutex<Option<(String, Instant)>>,
    dedup_window: Duration,
}

impl CallRegistry {
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            last_incoming: Mutex::new(None),
            dedup_window,
        }
    }

    pub fn call_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Claim the in-progress slot for an outgoing call.
    pub fn try_begin_outgoing(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the in-progress slot for an incoming call from `peer_id`.
    /// Repeat invocations for the same peer inside the dedup window are
    /// rejected even when no call is in progress yet.
    pub fn try_begin_incoming(&self, peer_id: &str) -> bool {
        if peer_id.is_empty() {
            return false;
        }
        let now = Instant::now();
        {
            let mut last = self.last_incoming.lock().unwrap();
            if let Some((last_peer, at)) = last.as_ref()
                && last_peer == peer_id
                && now.duration_since(*at) < self.dedup_window
            {
                return false;
            }
            *last = Some((peer_id.to_string(), now));
        }
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the in-progress slot when a session is torn down.
    pub fn finish(&self) {
        self.in_progress.store(false, Ordering::Release);
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}

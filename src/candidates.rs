//! ICE candidate bookkeeping.
//!
//! Local candidates are not always sent the moment the engine gathers them:
//! on the answering side they are held back until the answer has gone out
//! (so the answer and the first candidates travel the same channel), and a
//! session locked to the persistent channel queues while that channel is
//! momentarily unauthenticated. Queued candidates flush in arrival order
//! once the gate clears. Every outbound candidate is deduplicated on
//! `(sdp_mid, sdp_mline_index, candidate)`.
//!
//! Remote candidates are deduplicated on their raw wire payload before any
//! parsing, and buffered until the remote description is applied, then
//! replayed in arrival order exactly once.

use crate::channel::SignalChannel;
use crate::envelope::IceCandidate;
use dashmap::DashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Decision for one local candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalGate {
    /// Transmit now.
    Send,
    /// Hold until the answer is out (answering side).
    QueueUntilAnswer,
    /// Hold until the locked persistent channel is ready again.
    QueueUntilReady,
}

#[derive(Debug, Default)]
pub struct CandidateManager {
    sent_keys: DashSet<String>,
    queued_keys: DashSet<String>,
    pending_local: Mutex<Vec<IceCandidate>>,
    seen_remote: DashSet<String>,
    pending_remote: Mutex<Vec<IceCandidate>>,
    remote_ready: AtomicBool,
    sent_count: AtomicUsize,
}

impl CandidateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate a local candidate: queue while the answering side has not sent
    /// its answer, or while the session is locked to a persistent channel
    /// that is not currently ready.
    pub fn gate_local(
        &self,
        incoming: bool,
        answer_sent: bool,
        resolved: SignalChannel,
        locked: bool,
        persistent_ready: bool,
    ) -> LocalGate {
        if incoming && !answer_sent {
            return LocalGate::QueueUntilAnswer;
        }
        if resolved == SignalChannel::Persistent && locked && !persistent_ready {
            return LocalGate::QueueUntilReady;
        }
        LocalGate::Send
    }

    /// Mark a candidate as transmitted. `false` means it was a duplicate and
    /// must be dropped silently.
    pub fn mark_sent(&self, key: &str) -> bool {
        if !self.sent_keys.insert(key.to_string()) {
            return false;
        }
        self.sent_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Roll back a `mark_sent` after a failed enqueue so the candidate can
    /// be retried on the fallback channel.
    pub fn unmark_sent(&self, key: &str) {
        if self.sent_keys.remove(key).is_some() {
            self.sent_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent_count.load(Ordering::Relaxed)
    }

    /// Queue a local candidate. Duplicates of already-queued candidates are
    /// dropped. Returns `false` for a duplicate.
    pub fn queue_local(&self, candidate: IceCandidate) -> bool {
        if !self.queued_keys.insert(candidate.dedup_key()) {
            return false;
        }
        self.pending_local.lock().unwrap().push(candidate);
        true
    }

    /// Take every queued local candidate, in arrival order, clearing the
    /// queue-side dedup so the send-side dedup takes over.
    pub fn take_queued_local(&self) -> Vec<IceCandidate> {
        let drained = {
            let mut pending = self.pending_local.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        self.queued_keys.clear();
        drained
    }

    /// Dedup a remote candidate by its raw wire payload. `false` means it
    /// was already seen.
    pub fn note_remote_payload(&self, raw: &str) -> bool {
        self.seen_remote.insert(raw.to_string())
    }

    pub fn remote_ready(&self) -> bool {
        self.remote_ready.load(Ordering::Acquire)
    }

    /// Mark the remote description applied and hand back the buffered remote
    /// candidates for replay, in arrival order.
    pub fn mark_remote_ready(&self) -> Vec<IceCandidate> {
        self.remote_ready.store(true, Ordering::Release);
        let mut pending = self.pending_remote.lock().unwrap();
        std::mem::take(&mut *pending)
    }

    /// Buffer a remote candidate that arrived before the remote description.
    pub fn buffer_remote(&self, candidate: IceCandidate) {
        self.pending_remote.lock().unwrap().push(candidate);
    }

    /// Drop all transient state at teardown.
    pub fn reset(&self) {
        self.pending_local.lock().unwrap().clear();
        self.pending_remote.lock().unwrap().clear();
        self.queued_keys.clear();
        self.sent_keys.clear();
        self.sent_count.store(0, Ordering::Relaxed);
        self.remote_ready.store(false, Ordering::Release);
    }
}

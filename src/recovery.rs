//! Mid-call connectivity recovery.
//!
//! Activated when the media engine reports a degraded aggregate or ICE
//! state. While active, a fixed-interval tick decides between clearing
//! (engine healthy again), issuing an ICE-restart re-offer (offering side
//! only, bounded attempts), or forcing the call down once the grace period
//! expires. Healthy engine reports clear recovery immediately, without
//! waiting for the next tick.

use crate::latch::Latch;
use crate::sched::TimerSlot;
use crate::types::{CallDirection, ConnectionState, IceState};
use log::debug;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// What a recovery tick should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickVerdict {
    /// Recovery is not active; stop ticking.
    Idle,
    /// Engine healthy again: clear recovery and restore the phase.
    Recovered,
    /// Grace period exhausted: force the session down.
    GiveUp,
    /// Issue an ICE-restart re-offer.
    Reoffer,
    /// Keep waiting (answering side, attempts exhausted, or signaling
    /// unstable).
    Wait,
}

pub struct RecoverySupervisor {
    direction: CallDirection,
    grace: Duration,
    max_attempts: u32,
    active: AtomicBool,
    attempt_in_flight: Latch,
    notice_sent: Latch,
    attempts: AtomicU32,
    started_at: Mutex<Option<Instant>>,
    ticker: TimerSlot,
}

impl RecoverySupervisor {
    pub fn new(direction: CallDirection, grace: Duration, max_attempts: u32) -> Self {
        Self {
            direction,
            grace,
            max_attempts,
            active: AtomicBool::new(false),
            attempt_in_flight: Latch::new(),
            notice_sent: Latch::new(),
            attempts: AtomicU32::new(0),
            started_at: Mutex::new(None),
            ticker: TimerSlot::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Activate recovery. Returns `true` only on the activating call; the
    /// caller arms the ticker and flips the phase exactly once.
    pub fn begin(&self, reason: &str) -> bool {
        let newly_active = self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if newly_active {
            *self.started_at.lock().unwrap() = Some(Instant::now());
            self.attempts.store(0, Ordering::Relaxed);
        }
        if self.notice_sent.fire() {
            debug!("recovery start: {reason}");
        }
        newly_active
    }

    /// Deactivate and reset all recovery state. Returns `true` when
    /// recovery was actually active (or a ticker was still armed).
    pub fn clear(&self, reason: &str) -> bool {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        self.attempt_in_flight.release();
        self.notice_sent.release();
        self.attempts.store(0, Ordering::Relaxed);
        *self.started_at.lock().unwrap() = None;
        self.ticker.cancel();
        if was_active {
            debug!("recovery cleared: {reason}");
        }
        was_active
    }

    pub(crate) fn ticker(&self) -> &TimerSlot {
        &self.ticker
    }

    /// Decide what this tick should do given the engine's current state.
    pub fn assess(&self, conn: ConnectionState, ice: IceState) -> TickVerdict {
        if !self.is_active() {
            return TickVerdict::Idle;
        }
        if conn.is_connected() || ice.is_connected() {
            return TickVerdict::Recovered;
        }
        let elapsed = self
            .started_at
            .lock()
            .unwrap()
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO);
        if elapsed >= self.grace {
            return TickVerdict::GiveUp;
        }
        // Renegotiation belongs to the offering side only.
        if self.direction.is_incoming() {
            return TickVerdict::Wait;
        }
        if self.attempts.load(Ordering::Relaxed) >= self.max_attempts {
            return TickVerdict::Wait;
        }
        TickVerdict::Reoffer
    }

    /// Claim the re-offer slot so concurrent ticks cannot double-send.
    pub fn try_begin_attempt(&self) -> bool {
        if self.attempts.load(Ordering::Relaxed) >= self.max_attempts {
            return false;
        }
        self.attempt_in_flight.fire()
    }

    /// Finish an attempt. Counted only when the re-offer actually went out.
    pub fn end_attempt(&self, sent: bool) {
        if sent {
            self.attempts.fetch_add(1, Ordering::Relaxed);
        }
        self.attempt_in_flight.release();
    }
}

//! Cancellable timers.
//!
//! Every delayed or periodic operation in a session (offer-fetch retries,
//! the auth-wait timeout, signaling pollers, the recovery ticker) is held in
//! a [`TimerSlot`] so teardown can cancel the lot. Tasks are aborted on
//! drop; a callback that races teardown is expected to check the session's
//! finishing guard before acting.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Abort-on-drop handle to a scheduled task.
#[derive(Debug)]
pub struct Scheduled {
    handle: JoinHandle<()>,
}

impl Scheduled {
    /// Run `fut` once after `delay`.
    pub fn once<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });
        Self { handle }
    }

    /// Run `tick` every `period` after an `initial` delay, until it returns
    /// `false` or the handle is cancelled.
    pub fn repeating<F, Fut>(initial: Duration, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial).await;
            loop {
                if !tick().await {
                    return;
                }
                tokio::time::sleep(period).await;
            }
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Scheduled {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A slot holding at most one pending timer. Arming replaces (and cancels)
/// the previous occupant.
#[derive(Debug, Default)]
pub struct TimerSlot(Mutex<Option<Scheduled>>);

impl TimerSlot {
    pub const fn new() -> Self {
        Self(Mutex::new(None))
    }

    pub fn arm(&self, scheduled: Scheduled) {
        let mut slot = self.0.lock().unwrap();
        if let Some(prev) = slot.take() {
            prev.cancel();
        }
        *slot = Some(scheduled);
    }

    /// Arm only if the slot is empty or the previous task already finished.
    /// Returns `false` when a live timer is still in place.
    pub fn arm_if_idle(&self, make: impl FnOnce() -> Scheduled) -> bool {
        let mut slot = self.0.lock().unwrap();
        if let Some(prev) = slot.as_ref()
            && !prev.is_finished()
        {
            return false;
        }
        *slot = Some(make());
        true
    }

    pub fn cancel(&self) {
        if let Some(prev) = self.0.lock().unwrap().take() {
            prev.cancel();
        }
    }
}

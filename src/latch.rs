//! One-shot latches for exactly-once side effects.

use std::sync::atomic::{AtomicBool, Ordering};

/// A compare-and-set latch.
///
/// `fire()` returns `true` for exactly one caller; every later (or
/// concurrent) caller sees `false`. Used for the "did we already do X"
/// decisions that must hold under concurrent retries: answer sent, accepted
/// notified, call logged.
///
/// In-flight guards (`answer send in flight`, `recovery attempt in flight`)
/// reuse the same type but call [`Latch::release`] when the guarded
/// operation finishes, so a later attempt can take the slot again.
#[derive(Debug, Default)]
pub struct Latch(AtomicBool);

impl Latch {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Attempt to fire. Returns `true` only for the first caller.
    pub fn fire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the latch has fired.
    pub fn fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Release the latch so it can fire again. Only meaningful for
    /// in-flight guards; exactly-once latches are never released.
    pub fn release(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fires_once() {
        let latch = Latch::new();
        assert!(!latch.fired());
        assert!(latch.fire());
        assert!(latch.fired());
        assert!(!latch.fire());
    }

    #[test]
    fn test_release_reopens() {
        let latch = Latch::new();
        assert!(latch.fire());
        latch.release();
        assert!(latch.fire());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exactly_one_winner_under_contention() {
        let latch = Arc::new(Latch::new());
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let latch = latch.clone();
            tasks.push(tokio::spawn(async move { latch.fire() }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}

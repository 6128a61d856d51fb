//! Call log recording.

use crate::latch::Latch;
use crate::storage::CallLogStore;
use crate::types::{CallDirection, CallLogEntry, CallStatus, EndReason};
use crate::worker::SerialWorker;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::sync::Arc;

/// Terminal status as a pure function of direction, whether the call was
/// ever answered, and the explicit end reason (if any).
pub fn resolve_status(
    direction: CallDirection,
    answered: bool,
    end_reason: Option<EndReason>,
) -> CallStatus {
    if answered {
        return CallStatus::Ended;
    }
    match end_reason {
        Some(EndReason::Rejected) => CallStatus::Rejected,
        Some(EndReason::Cancelled) => CallStatus::Cancelled,
        Some(EndReason::Missed) => CallStatus::Missed,
        _ => match direction {
            CallDirection::Incoming => CallStatus::Missed,
            CallDirection::Outgoing => CallStatus::Cancelled,
        },
    }
}

/// Writes the terminal outcome of a session exactly once.
pub struct CallLogRecorder {
    store: Arc<dyn CallLogStore>,
    logged: Latch,
}

impl CallLogRecorder {
    pub fn new(store: Arc<dyn CallLogStore>) -> Self {
        Self {
            store,
            logged: Latch::new(),
        }
    }

    /// Build and persist the entry on the local I/O worker. Any invocation
    /// after the first is a no-op.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        io: &SerialWorker,
        peer_id: &str,
        peer_name: Option<&str>,
        direction: CallDirection,
        created_at: DateTime<Utc>,
        answered_at: Option<DateTime<Utc>>,
        end_reason: Option<EndReason>,
    ) {
        if !self.logged.fire() {
            debug!("call log: already recorded, skipping");
            return;
        }
        let now = Utc::now();
        let answered = answered_at.is_some();
        let status = resolve_status(direction, answered, end_reason);
        let started_at = answered_at.unwrap_or(created_at);
        let duration_secs = match answered_at {
            Some(at) => now.signed_duration_since(at).num_seconds().max(0),
            None => 0,
        };
        let entry = CallLogEntry {
            peer_id: peer_id.to_string(),
            peer_name: peer_name.unwrap_or("Unknown").to_string(),
            direction,
            status,
            started_at,
            ended_at: now,
            duration_secs,
        };
        let store = self.store.clone();
        io.submit(async move {
            if let Err(e) = store.insert(entry).await {
                warn!("call log: insert failed: {e}");
            }
        });
    }

    pub fn recorded(&self) -> bool {
        self.logged.fired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCallLogStore;
    use std::time::Duration;

    /// The status function is pure and matches the documented table.
    #[test]
    fn test_resolve_status_table() {
        use CallDirection::*;
        // Answered always wins.
        assert_eq!(resolve_status(Incoming, true, None), CallStatus::Ended);
        assert_eq!(
            resolve_status(Outgoing, true, Some(EndReason::Rejected)),
            CallStatus::Ended
        );
        // Explicit reasons pass through.
        assert_eq!(
            resolve_status(Incoming, false, Some(EndReason::Rejected)),
            CallStatus::Rejected
        );
        assert_eq!(
            resolve_status(Outgoing, false, Some(EndReason::Cancelled)),
            CallStatus::Cancelled
        );
        assert_eq!(
            resolve_status(Outgoing, false, Some(EndReason::Missed)),
            CallStatus::Missed
        );
        // Defaults by direction.
        assert_eq!(resolve_status(Incoming, false, None), CallStatus::Missed);
        assert_eq!(resolve_status(Outgoing, false, None), CallStatus::Cancelled);
        assert_eq!(
            resolve_status(Incoming, false, Some(EndReason::ConnectionLost)),
            CallStatus::Missed
        );
        assert_eq!(
            resolve_status(Outgoing, false, Some(EndReason::NoAnswer)),
            CallStatus::Cancelled
        );
    }

    /// Same inputs, same output, regardless of repetition.
    #[test]
    fn test_resolve_status_is_pure() {
        for _ in 0..3 {
            assert_eq!(
                resolve_status(CallDirection::Outgoing, false, Some(EndReason::Rejected)),
                CallStatus::Rejected
            );
        }
    }

    #[tokio::test]
    async fn test_records_exactly_once() {
        let store = Arc::new(MemoryCallLogStore::new());
        let recorder = CallLogRecorder::new(store.clone());
        let io = SerialWorker::spawn("io");
        let created = Utc::now();
        for _ in 0..3 {
            recorder.record(
                &io,
                "peer-1",
                Some("Ada"),
                CallDirection::Outgoing,
                created,
                None,
                Some(EndReason::Cancelled),
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, CallStatus::Cancelled);
        assert_eq!(entries[0].duration_secs, 0);
        assert_eq!(entries[0].peer_name, "Ada");
        assert!(recorder.recorded());
    }

    #[tokio::test]
    async fn test_answered_duration_non_negative() {
        let store = Arc::new(MemoryCallLogStore::new());
        let recorder = CallLogRecorder::new(store.clone());
        let io = SerialWorker::spawn("io");
        let created = Utc::now();
        // answered_at slightly in the future: duration clamps to zero.
        let answered = created + chrono::Duration::seconds(5);
        recorder.record(
            &io,
            "peer-1",
            None,
            CallDirection::Incoming,
            created,
            Some(answered),
            None,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        let entries = store.list().await.unwrap();
        assert_eq!(entries[0].status, CallStatus::Ended);
        assert_eq!(entries[0].duration_secs, 0);
        assert_eq!(entries[0].started_at, answered);
        assert_eq!(entries[0].peer_name, "Unknown");
    }
}

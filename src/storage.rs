//! Call-log persistence seam.

use crate::types::CallLogEntry;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

/// Storage collaborator for the call log. The host application typically
/// backs this with its structured store; [`MemoryCallLogStore`] serves tests
/// and ephemeral setups.
#[async_trait]
pub trait CallLogStore: Send + Sync {
    /// Append one record.
    async fn insert(&self, entry: CallLogEntry) -> Result<()>;

    /// All records, most recently started first.
    async fn list(&self) -> Result<Vec<CallLogEntry>>;
}

/// In-memory call log.
#[derive(Debug, Default)]
pub struct MemoryCallLogStore {
    entries: Mutex<Vec<CallLogEntry>>,
}

impl MemoryCallLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, without going through the async trait.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CallLogStore for MemoryCallLogStore {
    async fn insert(&self, entry: CallLogEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CallLogEntry>> {
        let mut entries = self.entries.lock().unwrap().clone();
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(entries)
    }
}

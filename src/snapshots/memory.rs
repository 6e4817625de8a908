use std::collections::BTreeMap;

use anyhow::Result;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use super::SnapshotStore;
use crate::models::SnapshotRecord;

/// In-memory snapshot history for tests.
#[derive(Default)]
pub struct MemorySnapshotStore {
    records: Mutex<BTreeMap<NaiveDate, SnapshotRecord>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn record(&self, record: &SnapshotRecord) -> Result<()> {
        self.records.lock().await.insert(record.date, record.clone());
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<SnapshotRecord>> {
        let records = self.records.lock().await;
        Ok(records.values().rev().take(limit).cloned().collect())
    }
}

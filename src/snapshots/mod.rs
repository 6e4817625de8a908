//! Dated history of aggregate snapshots.

mod json_file;
mod memory;

pub use json_file::JsonFileSnapshotStore;
pub use memory::MemorySnapshotStore;

use anyhow::Result;
use chrono_tz::Tz;

use crate::models::{AggregateSnapshot, SnapshotRecord};

/// Persists at most one snapshot per calendar date.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store a record, replacing any existing record for the same date.
    async fn record(&self, record: &SnapshotRecord) -> Result<()>;

    /// Up to `limit` records, newest date first.
    async fn list(&self, limit: usize) -> Result<Vec<SnapshotRecord>>;
}

/// Date a snapshot in `tz` and record it.
pub async fn record_snapshot(
    store: &dyn SnapshotStore,
    snapshot: AggregateSnapshot,
    tz: Tz,
) -> Result<SnapshotRecord> {
    let record = SnapshotRecord::dated_in(snapshot, tz);
    store.record(&record).await?;
    tracing::info!(date = %record.date, grand_total_usd = %record.snapshot.grand_total_usd, "Snapshot recorded");
    Ok(record)
}

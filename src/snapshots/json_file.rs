use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::fs;

use super::SnapshotStore;
use crate::models::SnapshotRecord;

/// Snapshot history as one JSON file per date.
///
/// Directory structure:
/// ```text
/// data/
///   snapshots/
///     2025-03-01.json
///     2025-03-02.json
/// ```
pub struct JsonFileSnapshotStore {
    base_path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            base_path: data_dir.as_ref().join("snapshots"),
        }
    }

    fn snapshot_file(&self, date: NaiveDate) -> PathBuf {
        self.base_path.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// Dates with a snapshot file, newest first.
    async fn dates(&self) -> Result<Vec<NaiveDate>> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to read snapshot directory"),
        };

        let mut dates = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("Failed to read entry")? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                dates.push(date);
            }
        }
        dates.sort_unstable_by(|a, b| b.cmp(a));
        Ok(dates)
    }

    async fn read(&self, date: NaiveDate) -> Result<SnapshotRecord> {
        let path = self.snapshot_file(date);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON from {}", path.display()))
    }
}

#[async_trait::async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn record(&self, record: &SnapshotRecord) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .context("Failed to create snapshot directory")?;

        let path = self.snapshot_file(record.date);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(record).context("Failed to serialize snapshot")?;
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<SnapshotRecord>> {
        let mut records = Vec::new();
        for date in self.dates().await? {
            if records.len() >= limit {
                break;
            }
            match self.read(date).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(date = %date, error = %format!("{e:#}"), "Skipping unreadable snapshot");
                }
            }
        }
        Ok(records)
    }
}

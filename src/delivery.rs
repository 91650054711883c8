//! Delivery logs: where the outcome of every notification attempt ends up.

use crate::core::{DeliveryLog, DeliveryRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// Keeps every record in memory for the life of the process.
#[derive(Default)]
pub struct InMemoryDeliveryLog {
    records: RwLock<Vec<DeliveryRecord>>,
}

impl InMemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<DeliveryRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl DeliveryLog for InMemoryDeliveryLog {
    async fn record(&self, record: DeliveryRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn records_for(&self, wedding_id: &str) -> Vec<DeliveryRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.wedding_id == wedding_id)
            .cloned()
            .collect()
    }
}

/// An in-memory log that also appends each record to a JSON-lines file.
pub struct JsonLinesDeliveryLog {
    inner: InMemoryDeliveryLog,
    path: PathBuf,
    // Serializes appends so lines from concurrent sends never interleave.
    write_lock: Mutex<()>,
}

impl JsonLinesDeliveryLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            inner: InMemoryDeliveryLog::new(),
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl DeliveryLog for JsonLinesDeliveryLog {
    async fn record(&self, record: DeliveryRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        // Kept in memory even when the append below fails.
        self.inner.record(record).await?;

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening delivery log {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn records_for(&self, wedding_id: &str) -> Vec<DeliveryRecord> {
        self.inner.records_for(wedding_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NotificationKind, SkipReason};

    #[tokio::test]
    async fn test_records_are_scoped_by_wedding() {
        let log = InMemoryDeliveryLog::new();
        log.record(DeliveryRecord::skipped("w1", "g1", NotificationKind::Invitation, SkipReason::NoChannel))
            .await
            .unwrap();
        log.record(DeliveryRecord::skipped("w2", "g2", NotificationKind::Invitation, SkipReason::OptedOut))
            .await
            .unwrap();

        let w1 = log.records_for("w1").await;
        assert_eq!(w1.len(), 1);
        assert_eq!(w1[0].guest_id, "g1");
        assert_eq!(log.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_json_lines_log_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deliveries.jsonl");
        let log = JsonLinesDeliveryLog::new(&path);

        for guest in ["g1", "g2"] {
            log.record(DeliveryRecord::skipped("w1", guest, NotificationKind::Announcement, SkipReason::OptedOut))
                .await
                .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: DeliveryRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.guest_id, "g1");
        assert_eq!(first.skip_reason, Some(SkipReason::OptedOut));
        assert_eq!(log.records_for("w1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_append_still_keeps_record_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonLinesDeliveryLog::new(dir.path().join("missing").join("deliveries.jsonl"));

        let result = log
            .record(DeliveryRecord::skipped("w1", "g1", NotificationKind::Invitation, SkipReason::NoChannel))
            .await;

        assert!(result.is_err());
        assert_eq!(log.records_for("w1").await.len(), 1);
    }
}

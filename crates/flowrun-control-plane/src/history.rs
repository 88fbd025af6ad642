//! Per-owner task history.
//!
//! History is grouped by owner, then by calendar day (`YYYY-MM-DD`). Writing a
//! record for a task already present under that day updates it in place.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use flowrun_core::HistoryRecord;

/// owner -> day -> records
pub type HistoryBook = HashMap<String, BTreeMap<String, Vec<HistoryRecord>>>;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Where history records go.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, owner: &str, day: &str, record: HistoryRecord)
        -> Result<(), HistoryError>;

    /// Every day of history for `owner`, oldest day first.
    async fn for_owner(&self, owner: &str) -> Result<BTreeMap<String, Vec<HistoryRecord>>, HistoryError>;
}

fn upsert(book: &mut HistoryBook, owner: &str, day: &str, record: HistoryRecord) {
    let records = book
        .entry(owner.to_string())
        .or_default()
        .entry(day.to_string())
        .or_default();
    match records.iter_mut().find(|r| r.task_id == record.task_id) {
        Some(existing) => existing.merge(record),
        None => records.push(record),
    }
}

/// History kept in process memory.
#[derive(Default)]
pub struct InMemoryHistory {
    book: Mutex<HistoryBook>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistorySink for InMemoryHistory {
    async fn record(
        &self,
        owner: &str,
        day: &str,
        record: HistoryRecord,
    ) -> Result<(), HistoryError> {
        upsert(&mut *self.book.lock().await, owner, day, record);
        Ok(())
    }

    async fn for_owner(&self, owner: &str) -> Result<BTreeMap<String, Vec<HistoryRecord>>, HistoryError> {
        Ok(self.book.lock().await.get(owner).cloned().unwrap_or_default())
    }
}

/// History persisted as one pretty-printed JSON file.
pub struct JsonFileHistory {
    path: PathBuf,
    book: Mutex<HistoryBook>,
}

impl JsonFileHistory {
    /// Open the file at `path`, starting empty if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let book = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => HistoryBook::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HistoryBook::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            book: Mutex::new(book),
        })
    }
}

#[async_trait]
impl HistorySink for JsonFileHistory {
    async fn record(
        &self,
        owner: &str,
        day: &str,
        record: HistoryRecord,
    ) -> Result<(), HistoryError> {
        let mut book = self.book.lock().await;
        upsert(&mut book, owner, day, record);
        let json = serde_json::to_string_pretty(&*book)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, json).await?;
        debug!(path = %self.path.display(), owner = %owner, "History written");
        Ok(())
    }

    async fn for_owner(&self, owner: &str) -> Result<BTreeMap<String, Vec<HistoryRecord>>, HistoryError> {
        Ok(self.book.lock().await.get(owner).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_core::{ResolutionTier, TaskKind, TaskState, TaskStatus, WorkInput};

    fn state() -> TaskState {
        TaskState::new(
            "alice",
            TaskKind::PromptToVideo,
            ResolutionTier::Standard,
            vec![WorkInput::Prompt {
                prompt: "a".into(),
            }],
        )
    }

    #[tokio::test]
    async fn test_upsert_by_task_id() {
        let history = InMemoryHistory::new();
        let mut task = state();
        history
            .record("alice", "2026-10-16", HistoryRecord::from_state(&task))
            .await
            .unwrap();
        task.status = TaskStatus::Finished;
        history
            .record("alice", "2026-10-16", HistoryRecord::from_state(&task))
            .await
            .unwrap();
        history
            .record("alice", "2026-10-16", HistoryRecord::from_state(&state()))
            .await
            .unwrap();

        let days = history.for_owner("alice").await.unwrap();
        let records = &days["2026-10-16"];
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].task_id, task.id);
        assert_eq!(records[0].status, TaskStatus::Finished);
        assert!(history.for_owner("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history").join("history.json");
        let task = state();

        {
            let history = JsonFileHistory::open(&path).await.unwrap();
            history
                .record("alice", "2026-10-15", HistoryRecord::from_state(&task))
                .await
                .unwrap();
        }

        let reopened = JsonFileHistory::open(&path).await.unwrap();
        let days = reopened.for_owner("alice").await.unwrap();
        assert_eq!(days["2026-10-15"][0].task_id, task.id);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"Initializing\""));
    }

    #[tokio::test]
    async fn test_json_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonFileHistory::open(&path).await,
            Err(HistoryError::Serialization(_))
        ));
    }
}

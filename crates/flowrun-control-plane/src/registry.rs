//! In-memory task registry.
//!
//! Every task lives behind its own lock so runners for different tasks never
//! contend. The cancel flag is a [`CancellationToken`]: once set it stays set,
//! and runners can await it while sleeping or polling.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use flowrun_core::{CoreError, ItemStatus, LogEntry, TaskId, TaskState, TaskStatus};

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("task already registered: {0}")]
    DuplicateTask(TaskId),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task is {0} and can no longer be cancelled")]
    NotCancellable(TaskStatus),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// One registered task.
pub struct TaskEntry {
    state: RwLock<TaskState>,
    cancel: CancellationToken,
}

impl TaskEntry {
    fn new(state: TaskState) -> Self {
        Self {
            state: RwLock::new(state),
            cancel: CancellationToken::new(),
        }
    }

    /// Consistent copy of the task, including the live cancel flag.
    pub async fn snapshot(&self) -> TaskState {
        let mut state = self.state.read().await.clone();
        state.cancel_requested = self.cancel.is_cancelled();
        state
    }

    /// Token runners watch for cancellation.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Set the cancel flag if the task can still be stopped.
    ///
    /// Repeated requests on a cancellable task succeed and change nothing.
    pub async fn request_cancel(&self) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        if !state.status.is_cancellable() {
            return Err(RegistryError::NotCancellable(state.status));
        }
        state.cancel_requested = true;
        self.cancel.cancel();
        Ok(())
    }

    pub async fn append_log(&self, message: impl Into<String>) -> LogEntry {
        self.state.write().await.append_log(message).clone()
    }

    /// Change one item's status. Returns the previous status.
    pub async fn set_item_status(
        &self,
        index: usize,
        status: ItemStatus,
        artifact: Option<String>,
    ) -> Result<ItemStatus, CoreError> {
        self.state
            .write()
            .await
            .set_item_status(index, status, artifact)
    }

    pub async fn set_counters(&self, completed: usize, errors: usize) -> Result<(), CoreError> {
        self.state.write().await.set_counters(completed, errors)
    }

    /// Apply an item status change and the new counters in one step, so
    /// readers never see them disagree. Nothing changes if either is invalid.
    /// Returns the item's previous status.
    pub async fn record_item_outcome(
        &self,
        index: usize,
        status: ItemStatus,
        artifact: Option<String>,
        completed: usize,
        errors: usize,
    ) -> Result<ItemStatus, CoreError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let previous = next.set_item_status(index, status, artifact)?;
        next.set_counters(completed, errors)?;
        *state = next;
        Ok(previous)
    }

    /// Mark every still-Pending item Stopped. Returns the indices changed.
    pub async fn stop_pending(&self) -> Vec<usize> {
        let mut state = self.state.write().await;
        let pending: Vec<usize> = state
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status() == ItemStatus::Pending)
            .map(|(index, _)| index)
            .collect();
        state.stop_pending();
        pending
    }

    /// Change the overall status and return the updated snapshot.
    pub async fn set_status(&self, status: TaskStatus) -> TaskState {
        self.state.write().await.status = status;
        self.snapshot().await
    }
}

/// Registry of all tasks, keyed by id.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Arc<TaskEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task.
    pub async fn create(&self, state: TaskState) -> Result<Arc<TaskEntry>, RegistryError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&state.id) {
            return Err(RegistryError::DuplicateTask(state.id));
        }
        let id = state.id.clone();
        let entry = Arc::new(TaskEntry::new(state));
        tasks.insert(id, entry.clone());
        Ok(entry)
    }

    pub async fn entry(&self, id: &TaskId) -> Result<Arc<TaskEntry>, RegistryError> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Snapshot of one task.
    pub async fn get(&self, id: &TaskId) -> Result<TaskState, RegistryError> {
        Ok(self.entry(id).await?.snapshot().await)
    }

    /// Snapshots of every task submitted by `owner`, oldest first.
    pub async fn owned_by(&self, owner: &str) -> Vec<TaskState> {
        let mut out = Vec::new();
        for entry in self.entries().await {
            let state = entry.snapshot().await;
            if state.owner == owner {
                out.push(state);
            }
        }
        sort_by_creation(&mut out);
        out
    }

    /// Snapshots of every task, oldest first.
    pub async fn all(&self) -> Vec<TaskState> {
        let mut out = Vec::new();
        for entry in self.entries().await {
            out.push(entry.snapshot().await);
        }
        sort_by_creation(&mut out);
        out
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn append_log(
        &self,
        id: &TaskId,
        message: impl Into<String>,
    ) -> Result<LogEntry, RegistryError> {
        Ok(self.entry(id).await?.append_log(message).await)
    }

    /// Change one item's status. Returns the previous status.
    pub async fn set_item_status(
        &self,
        id: &TaskId,
        index: usize,
        status: ItemStatus,
        artifact: Option<String>,
    ) -> Result<ItemStatus, RegistryError> {
        let entry = self.entry(id).await?;
        Ok(entry.set_item_status(index, status, artifact).await?)
    }

    pub async fn set_counters(
        &self,
        id: &TaskId,
        completed: usize,
        errors: usize,
    ) -> Result<(), RegistryError> {
        Ok(self.entry(id).await?.set_counters(completed, errors).await?)
    }

    /// Change the overall status and return the updated snapshot.
    pub async fn set_overall_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<TaskState, RegistryError> {
        Ok(self.entry(id).await?.set_status(status).await)
    }

    pub async fn request_cancel(&self, id: &TaskId) -> Result<(), RegistryError> {
        self.entry(id).await?.request_cancel().await
    }

    async fn entries(&self) -> Vec<Arc<TaskEntry>> {
        self.tasks.read().await.values().cloned().collect()
    }
}

fn sort_by_creation(states: &mut [TaskState]) {
    states.sort_by(|a, b| a.created_at.cmp(&b.created_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_core::{ResolutionTier, TaskKind, WorkInput};

    fn task(owner: &str, n: usize) -> TaskState {
        let inputs = (0..n)
            .map(|i| WorkInput::Prompt {
                prompt: format!("p{i}"),
            })
            .collect();
        TaskState::new(owner, TaskKind::PromptToVideo, ResolutionTier::Standard, inputs)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = TaskRegistry::new();
        let state = task("alice", 2);
        let id = state.id.clone();
        registry.create(state).await.unwrap();

        let snapshot = registry.get(&id).await.unwrap();
        assert_eq!(snapshot.owner, "alice");
        assert_eq!(snapshot.total(), 2);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let registry = TaskRegistry::new();
        let state = task("alice", 1);
        registry.create(state.clone()).await.unwrap();
        assert!(matches!(
            registry.create(state).await,
            Err(RegistryError::DuplicateTask(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let registry = TaskRegistry::new();
        let id = TaskId::new("missing");
        assert!(matches!(
            registry.get(&id).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.request_cancel(&id).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_sticky() {
        let registry = TaskRegistry::new();
        let state = task("alice", 1);
        let id = state.id.clone();
        let entry = registry.create(state).await.unwrap();

        registry.request_cancel(&id).await.unwrap();
        registry.request_cancel(&id).await.unwrap();
        assert!(entry.is_cancel_requested());
        assert!(entry.cancel_token().is_cancelled());

        registry
            .set_overall_status(&id, TaskStatus::Stopped)
            .await
            .unwrap();
        assert!(matches!(
            registry.request_cancel(&id).await,
            Err(RegistryError::NotCancellable(TaskStatus::Stopped))
        ));
        assert!(registry.get(&id).await.unwrap().cancel_requested);
    }

    #[tokio::test]
    async fn test_owned_by_filters() {
        let registry = TaskRegistry::new();
        registry.create(task("alice", 1)).await.unwrap();
        registry.create(task("bob", 1)).await.unwrap();
        registry.create(task("alice", 3)).await.unwrap();

        let mine = registry.owned_by("alice").await;
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|t| t.owner == "alice"));
        assert_eq!(registry.all().await.len(), 3);
        assert!(registry.owned_by("carol").await.is_empty());
    }

    #[tokio::test]
    async fn test_outcome_applies_atomically() {
        let registry = TaskRegistry::new();
        let state = task("alice", 2);
        let id = state.id.clone();
        let entry = registry.create(state).await.unwrap();
        registry
            .set_item_status(&id, 0, ItemStatus::Running, None)
            .await
            .unwrap();

        // Counters overflow: neither item status nor counters change.
        let err = entry
            .record_item_outcome(0, ItemStatus::Finished, Some("a.mp4".into()), 2, 1)
            .await;
        assert!(err.is_err());
        let snapshot = registry.get(&id).await.unwrap();
        assert_eq!(snapshot.items[0].status(), ItemStatus::Running);
        assert_eq!(snapshot.completed, 0);

        let previous = entry
            .record_item_outcome(0, ItemStatus::Finished, Some("a.mp4".into()), 1, 0)
            .await
            .unwrap();
        assert_eq!(previous, ItemStatus::Running);
        let snapshot = entry.snapshot().await;
        assert_eq!(snapshot.items[0].output_artifact_name(), "a.mp4");
        assert_eq!(snapshot.progress, 50);
    }

    #[tokio::test]
    async fn test_stop_pending_reports_indices() {
        let registry = TaskRegistry::new();
        let state = task("alice", 3);
        let entry = registry.create(state).await.unwrap();
        entry
            .set_item_status(0, ItemStatus::Running, None)
            .await
            .unwrap();
        assert_eq!(entry.stop_pending().await, vec![1, 2]);
        assert!(entry.stop_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_illegal_item_transition_surfaces() {
        let registry = TaskRegistry::new();
        let state = task("alice", 1);
        let id = state.id.clone();
        registry.create(state).await.unwrap();
        assert!(matches!(
            registry
                .set_item_status(&id, 0, ItemStatus::Finished, None)
                .await,
            Err(RegistryError::Core(CoreError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_log_is_append_only() {
        let registry = TaskRegistry::new();
        let state = task("alice", 0);
        let id = state.id.clone();
        registry.create(state).await.unwrap();
        registry.append_log(&id, "first").await.unwrap();
        registry.append_log(&id, "second").await.unwrap();
        let log = registry.get(&id).await.unwrap().log;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message, "first");
        assert_eq!(log[1].message, "second");
    }
}

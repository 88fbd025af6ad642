//! Task submission, cancellation and queries.

use std::sync::Arc;

use chrono::Local;
use thiserror::Error;
use tracing::{error, info, warn};

use flowrun_core::{
    HistoryRecord, ResolutionTier, TaskId, TaskKind, TaskState, TaskStatus, WorkInput,
};

use crate::registry::RegistryError;
use crate::runner::JobRunner;
use crate::state::{AppState, ProgressEvent};

/// Who is calling, as established by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub name: String,
    pub team: String,
    /// Elevated callers may see and cancel any task.
    pub elevated: bool,
}

impl Requester {
    pub fn new(name: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: team.into(),
            elevated: false,
        }
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    fn may_access(&self, task: &TaskState) -> bool {
        self.elevated || task.owner == self.name
    }
}

/// A batch submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// `"P2V"`, `"I2V"` or a canonical kind name.
    pub kind: String,
    /// `"720p"` / `"1080p"`; standard when absent.
    pub resolution: Option<String>,
    pub items: Vec<WorkInput>,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("not allowed to access task {0}")]
    Forbidden(TaskId),

    #[error("submission refused: {0}")]
    NotAllowed(String),

    #[error("invalid task kind: {0}")]
    InvalidKind(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("item {index} does not match task kind {kind}")]
    InvalidItem { index: usize, kind: TaskKind },

    #[error("task is {0} and can no longer be cancelled")]
    NotCancellable(TaskStatus),

    #[error(transparent)]
    Registry(RegistryError),
}

impl From<RegistryError> for OrchestratorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::NotFound(id),
            RegistryError::NotCancellable(status) => Self::NotCancellable(status),
            other => Self::Registry(other),
        }
    }
}

/// Front door for submitting, cancelling and inspecting tasks.
#[derive(Clone)]
pub struct Orchestrator {
    state: Arc<AppState>,
}

impl Orchestrator {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Register a task and launch its runner. Returns as soon as the task
    /// is registered.
    pub async fn submit(
        &self,
        requester: &Requester,
        request: SubmitRequest,
    ) -> Result<TaskId, OrchestratorError> {
        let today = Local::now().date_naive();
        let decision = self
            .state
            .policy
            .is_submission_allowed(&requester.team, today)
            .await;
        if !decision.allowed {
            info!(owner = %requester.name, team = %requester.team, reason = %decision.reason, "Submission refused by policy");
            return Err(OrchestratorError::NotAllowed(decision.reason));
        }

        let kind: TaskKind = request
            .kind
            .parse()
            .map_err(|_| OrchestratorError::InvalidKind(request.kind.clone()))?;
        let resolution = match request.resolution.as_deref() {
            None | Some("") => ResolutionTier::default(),
            Some(raw) => raw
                .parse()
                .map_err(|_| OrchestratorError::InvalidResolution(raw.to_string()))?,
        };
        if let Some(index) = request.items.iter().position(|i| !i.matches_kind(kind)) {
            return Err(OrchestratorError::InvalidItem { index, kind });
        }

        let task = TaskState::new(requester.name.clone(), kind, resolution, request.items);
        let task_id = task.id.clone();
        let entry = self.state.registry.create(task.clone()).await?;

        let day = Local::now().format("%Y-%m-%d").to_string();
        if let Err(e) = self
            .state
            .history
            .record(&task.owner, &day, HistoryRecord::from_state(&task))
            .await
        {
            warn!(task_id = %task_id, error = %e, "Failed to write history record");
        }

        info!(
            task_id = %task_id,
            owner = %task.owner,
            kind = %kind,
            resolution = %resolution,
            items = task.total(),
            "Task submitted"
        );
        self.state.notify(ProgressEvent::TaskCreated {
            task_id: task_id.clone(),
            owner: task.owner.clone(),
            kind,
            total_items: task.total(),
        });

        let runner = JobRunner::new(self.state.clone(), entry, &task);
        let spawned_id = task_id.clone();
        tokio::spawn(async move {
            match runner.run().await {
                Ok(status) => info!(task_id = %spawned_id, status = %status, "Job runner finished"),
                Err(e) => error!(task_id = %spawned_id, error = %e, "Job runner aborted"),
            }
        });

        Ok(task_id)
    }

    /// Ask a task to stop. Takes effect at the runner's next checkpoint.
    pub async fn cancel(
        &self,
        task_id: &TaskId,
        requester: &Requester,
    ) -> Result<(), OrchestratorError> {
        let entry = self.state.registry.entry(task_id).await?;
        let task = entry.snapshot().await;
        if !requester.may_access(&task) {
            return Err(OrchestratorError::Forbidden(task_id.clone()));
        }

        entry.request_cancel().await?;
        info!(task_id = %task_id, by = %requester.name, "Cancel requested");
        self.state.notify(ProgressEvent::CancelRequested {
            task_id: task_id.clone(),
            owner: task.owner,
        });
        Ok(())
    }

    /// Every task submitted by `owner`.
    pub async fn query(&self, owner: &str) -> Vec<TaskState> {
        self.state.registry.owned_by(owner).await
    }

    /// One task, if the requester may see it.
    pub async fn get(
        &self,
        task_id: &TaskId,
        requester: &Requester,
    ) -> Result<TaskState, OrchestratorError> {
        let task = self.state.registry.get(task_id).await?;
        if !requester.may_access(&task) {
            return Err(OrchestratorError::Forbidden(task_id.clone()));
        }
        Ok(task)
    }

    /// Every task in the registry. Elevated requesters only.
    pub async fn query_all(&self, requester: &Requester) -> Result<Vec<TaskState>, OrchestratorError> {
        if !requester.elevated {
            return Err(OrchestratorError::NotAllowed(
                "listing all tasks requires elevated access".to_string(),
            ));
        }
        Ok(self.state.registry.all().await)
    }
}

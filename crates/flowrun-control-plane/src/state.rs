//! Shared application state.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use flowrun_core::{ItemStatus, TaskId, TaskKind, TaskStatus};

use crate::config::RunnerConfig;
use crate::history::HistorySink;
use crate::registry::TaskRegistry;
use crate::remote::{ArtifactDownloader, RemoteOperationClient, SchedulingPolicy};

/// Buffered notifications per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Progress notification fanned out to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskCreated {
        task_id: TaskId,
        owner: String,
        kind: TaskKind,
        total_items: usize,
    },
    TaskStatusChanged {
        task_id: TaskId,
        owner: String,
        status: TaskStatus,
    },
    ItemStatusChanged {
        task_id: TaskId,
        owner: String,
        index: usize,
        from: ItemStatus,
        to: ItemStatus,
    },
    ProgressUpdated {
        task_id: TaskId,
        owner: String,
        completed: usize,
        errors: usize,
        progress: u8,
    },
    CancelRequested {
        task_id: TaskId,
        owner: String,
    },
}

impl ProgressEvent {
    /// Owner of the task the event is about.
    pub fn owner(&self) -> &str {
        match self {
            Self::TaskCreated { owner, .. }
            | Self::TaskStatusChanged { owner, .. }
            | Self::ItemStatusChanged { owner, .. }
            | Self::ProgressUpdated { owner, .. }
            | Self::CancelRequested { owner, .. } => owner,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::TaskCreated { task_id, .. }
            | Self::TaskStatusChanged { task_id, .. }
            | Self::ItemStatusChanged { task_id, .. }
            | Self::ProgressUpdated { task_id, .. }
            | Self::CancelRequested { task_id, .. } => task_id,
        }
    }
}

/// External collaborators wired into the control plane.
pub struct Collaborators {
    pub remote: Arc<dyn RemoteOperationClient>,
    pub downloader: Arc<dyn ArtifactDownloader>,
    pub history: Arc<dyn HistorySink>,
    pub policy: Arc<dyn SchedulingPolicy>,
}

/// Shared application state.
pub struct AppState {
    /// Tasks indexed by TaskId.
    pub registry: TaskRegistry,

    pub remote: Arc<dyn RemoteOperationClient>,
    pub downloader: Arc<dyn ArtifactDownloader>,
    pub history: Arc<dyn HistorySink>,
    pub policy: Arc<dyn SchedulingPolicy>,

    /// Timings handed to every job runner.
    pub runner_config: RunnerConfig,

    /// Directory finished artifacts are stored in.
    pub artifact_dir: PathBuf,

    notifications: broadcast::Sender<ProgressEvent>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(
        collaborators: Collaborators,
        runner_config: RunnerConfig,
        artifact_dir: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let (notifications, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            registry: TaskRegistry::new(),
            remote: collaborators.remote,
            downloader: collaborators.downloader,
            history: collaborators.history,
            policy: collaborators.policy,
            runner_config,
            artifact_dir: artifact_dir.into(),
            notifications,
        })
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn notify(&self, event: ProgressEvent) {
        let _ = self.notifications.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.notifications.subscribe()
    }
}

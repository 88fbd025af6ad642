//! Per-task job runner.
//!
//! A runner owns every mutation of its task except the cancel flag. It opens
//! a remote session, works through the items strictly in order, retries the
//! first-pass failures once, and finalizes the task. Cancellation is observed
//! before each item, during cooldown, and while any remote call or download
//! is in flight.

mod poll;

use std::sync::Arc;

use chrono::Local;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use flowrun_core::naming::{artifact_name, job_prefix};
use flowrun_core::task::progress_percent;
use flowrun_core::{
    CoreError, ErrorReason, HistoryRecord, ItemStatus, JobId, ResolutionTier, TaskId, TaskKind,
    TaskState, TaskStatus, WorkInput,
};

use crate::registry::TaskEntry;
use crate::remote::{Credential, DownloadError, OperationHandle, RemoteError};
use crate::state::{AppState, ProgressEvent};
use poll::Cut;

/// Why one attempt at an item failed.
#[derive(Debug, Error)]
enum ItemError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Download(#[from] DownloadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Main,
    Retry,
}

/// Drives one task from Initializing to a terminal status.
pub struct JobRunner {
    state: Arc<AppState>,
    entry: Arc<TaskEntry>,
    cancel: CancellationToken,
    task_id: TaskId,
    owner: String,
    kind: TaskKind,
    resolution: ResolutionTier,
    inputs: Vec<WorkInput>,
    completed: usize,
    errors: usize,
    attempts: usize,
}

impl JobRunner {
    /// Build a runner for a freshly registered task.
    pub fn new(state: Arc<AppState>, entry: Arc<TaskEntry>, task: &TaskState) -> Self {
        Self {
            cancel: entry.cancel_token(),
            state,
            entry,
            task_id: task.id.clone(),
            owner: task.owner.clone(),
            kind: task.kind,
            resolution: task.resolution,
            inputs: task.items.iter().map(|item| item.input.clone()).collect(),
            completed: 0,
            errors: 0,
            attempts: 0,
        }
    }

    /// Run the task to completion and return its terminal status.
    pub async fn run(mut self) -> Result<TaskStatus, CoreError> {
        let total = self.inputs.len();
        info!(task_id = %self.task_id, owner = %self.owner, kind = %self.kind, total, "Job runner started");
        self.log(format!(
            "Task started: {} {} items at {}",
            total, self.kind, self.resolution
        ))
        .await;
        self.publish_progress();

        let credential = match self.state.remote.open_session(self.kind).await {
            Ok(credential) => credential,
            Err(e) => {
                let reason = match e {
                    RemoteError::Credential(_) | RemoteError::Unauthorized => {
                        ErrorReason::Credential
                    }
                    _ => ErrorReason::Init,
                };
                error!(task_id = %self.task_id, error = %e, "Failed to open remote session");
                self.log(format!("Initialization failed: {}", e)).await;
                return Ok(self.finish(TaskStatus::Error(reason)).await);
            }
        };
        self.log("Remote session ready").await;
        self.set_status(TaskStatus::Running).await;

        match self.work(&credential).await {
            Ok(status) => Ok(status),
            Err(e) => {
                error!(task_id = %self.task_id, error = %e, "Task bookkeeping failed");
                self.log(format!("Runner aborted: {}", e)).await;
                self.finish(TaskStatus::Error(ErrorReason::Internal)).await;
                Err(e)
            }
        }
    }

    /// Main pass, then one retry pass over the failures.
    async fn work(&mut self, credential: &Credential) -> Result<TaskStatus, CoreError> {
        let total = self.inputs.len();
        let mut failed = Vec::new();
        for index in 0..total {
            self.cooldown().await;
            if self.cancel.is_cancelled() {
                return Ok(self.stop().await);
            }
            if !self.attempt(index, Pass::Main, credential).await? {
                failed.push(index);
            }
        }

        if !failed.is_empty() {
            self.log(format!("Retrying {} failed items", failed.len()))
                .await;
            for index in failed {
                self.cooldown().await;
                if self.cancel.is_cancelled() {
                    self.log("Retry pass interrupted by cancel request").await;
                    break;
                }
                self.attempt(index, Pass::Retry, credential).await?;
            }
        }

        let status = if self.cancel.is_cancelled() {
            TaskStatus::Stopped
        } else {
            TaskStatus::Finished
        };
        Ok(self.finish(status).await)
    }

    /// One attempt at one item. Returns true if the item finished.
    async fn attempt(
        &mut self,
        index: usize,
        pass: Pass,
        credential: &Credential,
    ) -> Result<bool, CoreError> {
        let retry = pass == Pass::Retry;
        let job = JobId::generate(job_prefix(self.kind, retry), index);
        self.attempts += 1;

        if retry {
            self.errors = self.errors.saturating_sub(1);
        }
        self.record_outcome(index, ItemStatus::Running, None).await?;
        self.log(format!(
            "[{}] Item {}/{} started: {}",
            job,
            index + 1,
            self.inputs.len(),
            self.inputs[index].prompt()
        ))
        .await;

        let finished = match self.process_item(index, &job, credential).await {
            Ok(name) => {
                self.completed += 1;
                self.record_outcome(index, ItemStatus::Finished, Some(name.clone()))
                    .await?;
                info!(task_id = %self.task_id, item = index, job_id = %job, artifact = %name, "Item finished");
                self.log(format!("[{}] Item finished: {}", job, name)).await;
                true
            }
            Err(e) => {
                self.errors += 1;
                let status = match pass {
                    Pass::Main => ItemStatus::Error,
                    Pass::Retry => ItemStatus::ErrorRetried,
                };
                self.record_outcome(index, status, None).await?;
                warn!(task_id = %self.task_id, item = index, job_id = %job, error = %e, "Item failed");
                self.log(format!("[{}] Item failed: {}", job, e)).await;
                false
            }
        };
        Ok(finished)
    }

    /// Generate, optionally enhance, and store one item's artifact.
    async fn process_item(
        &self,
        index: usize,
        job: &JobId,
        credential: &Credential,
    ) -> Result<String, ItemError> {
        let input = &self.inputs[index];
        let config = self.state.runner_config;

        let handle = self
            .remote_call(
                config.request_timeout,
                self.state.remote.begin(self.kind, input, credential),
            )
            .await?;
        self.log(format!("[{}] Operation started: {}", job, handle))
            .await;
        let mut locator = self
            .poll_operation(&handle, credential, config.poll_timeout, job)
            .await?;

        let mut tier = ResolutionTier::Standard;
        if self.resolution == ResolutionTier::Upscaled {
            match self.enhance(&handle, credential, job).await {
                Ok(upscaled) => {
                    locator = upscaled;
                    tier = ResolutionTier::Upscaled;
                }
                Err(RemoteError::Interrupted) => return Err(RemoteError::Interrupted.into()),
                Err(e) => {
                    warn!(task_id = %self.task_id, item = index, job_id = %job, error = %e, "Upscale failed, keeping standard artifact");
                    self.log(format!(
                        "[{}] Upscale failed ({}), keeping {} artifact",
                        job,
                        e,
                        ResolutionTier::Standard
                    ))
                    .await;
                }
            }
        }

        let name = artifact_name(self.kind, tier, input, job);
        let dest = self.state.artifact_dir.join(&name);
        let fetch = self.state.downloader.fetch(&locator, &dest);
        let bytes = match self
            .guarded(Instant::now() + config.download_timeout, fetch)
            .await
        {
            Ok(fetched) => fetched?,
            Err(cut) => {
                if tokio::fs::remove_file(&dest).await.is_ok() {
                    warn!(task_id = %self.task_id, dest = %dest.display(), "Removed partial download");
                }
                return Err(match cut {
                    Cut::Cancelled => DownloadError::Interrupted,
                    Cut::Deadline => DownloadError::Timeout(config.download_timeout),
                }
                .into());
            }
        };
        self.log(format!("[{}] Saved {} ({} bytes)", job, name, bytes))
            .await;
        Ok(name)
    }

    async fn enhance(
        &self,
        source: &OperationHandle,
        credential: &Credential,
        job: &JobId,
    ) -> Result<crate::remote::ArtifactLocator, RemoteError> {
        let handle = self
            .remote_call(
                self.state.runner_config.request_timeout,
                self.state.remote.begin_enhance(source, credential),
            )
            .await?;
        self.log(format!("[{}] Upscale started: {}", job, handle))
            .await;
        self.poll_operation(&handle, credential, self.state.runner_config.enhance_timeout, job)
            .await
    }

    /// Pause between items. Wakes early on cancel.
    async fn cooldown(&self) {
        if self.attempts == 0 {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.state.runner_config.cooldown) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    /// Cancel checkpoint hit: stop everything not yet started.
    async fn stop(&self) -> TaskStatus {
        let stopped = self.entry.stop_pending().await;
        for &index in &stopped {
            self.state.notify(ProgressEvent::ItemStatusChanged {
                task_id: self.task_id.clone(),
                owner: self.owner.clone(),
                index,
                from: ItemStatus::Pending,
                to: ItemStatus::Stopped,
            });
        }
        info!(task_id = %self.task_id, stopped = stopped.len(), "Task stopped by cancel request");
        self.log(format!(
            "Cancel requested: {} items not started",
            stopped.len()
        ))
        .await;
        self.finish(TaskStatus::Stopped).await
    }

    async fn finish(&self, status: TaskStatus) -> TaskStatus {
        self.log(format!(
            "Task {}: {} of {} finished, {} failed",
            status,
            self.completed,
            self.inputs.len(),
            self.errors
        ))
        .await;
        self.set_status(status).await;
        status
    }

    async fn record_outcome(
        &self,
        index: usize,
        status: ItemStatus,
        artifact: Option<String>,
    ) -> Result<(), CoreError> {
        let from = self
            .entry
            .record_item_outcome(index, status, artifact, self.completed, self.errors)
            .await?;
        self.state.notify(ProgressEvent::ItemStatusChanged {
            task_id: self.task_id.clone(),
            owner: self.owner.clone(),
            index,
            from,
            to: status,
        });
        self.publish_progress();
        Ok(())
    }

    fn publish_progress(&self) {
        self.state.notify(ProgressEvent::ProgressUpdated {
            task_id: self.task_id.clone(),
            owner: self.owner.clone(),
            completed: self.completed,
            errors: self.errors,
            progress: progress_percent(self.completed, self.inputs.len()),
        });
    }

    /// Change the overall status, write history and notify observers.
    async fn set_status(&self, status: TaskStatus) {
        let snapshot = self.entry.set_status(status).await;
        info!(task_id = %self.task_id, status = %status, "Task status changed");

        let day = Local::now().format("%Y-%m-%d").to_string();
        let record = HistoryRecord::from_state(&snapshot);
        if let Err(e) = self.state.history.record(&self.owner, &day, record).await {
            warn!(task_id = %self.task_id, error = %e, "Failed to write history record");
        }

        self.state.notify(ProgressEvent::TaskStatusChanged {
            task_id: self.task_id.clone(),
            owner: self.owner.clone(),
            status,
        });
    }

    async fn log(&self, message: impl Into<String>) {
        self.entry.append_log(message).await;
    }
}

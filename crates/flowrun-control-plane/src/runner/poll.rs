//! Waiting on remote operations.
//!
//! Every call into a collaborator is raced against the task's cancel token
//! and a deadline, so a request that never answers cannot pin the runner.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use flowrun_core::JobId;

use super::JobRunner;
use crate::remote::{ArtifactLocator, Credential, OperationHandle, PollStatus, RemoteError};

/// Why a guarded call was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Cut {
    Deadline,
    Cancelled,
}

impl JobRunner {
    /// Drive `call` until it completes, `deadline` passes or the task is
    /// cancelled. A call that is ready wins over both.
    pub(super) async fn guarded<F: Future>(
        &self,
        deadline: Instant,
        call: F,
    ) -> Result<F::Output, Cut> {
        tokio::select! {
            biased;
            output = call => Ok(output),
            _ = self.cancel.cancelled() => Err(Cut::Cancelled),
            _ = sleep_until(deadline) => Err(Cut::Deadline),
        }
    }

    /// One remote request bounded by `limit`.
    pub(super) async fn remote_call<T, F>(
        &self,
        limit: Duration,
        call: F,
    ) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match self.guarded(Instant::now() + limit, call).await {
            Ok(result) => result,
            Err(Cut::Cancelled) => Err(RemoteError::Interrupted),
            Err(Cut::Deadline) => Err(RemoteError::Timeout(limit)),
        }
    }

    /// Poll `handle` until it succeeds, fails, times out or the task is
    /// cancelled. Any poll error ends the wait. `timeout` covers the whole
    /// wait, including a poll request that never answers.
    pub(super) async fn poll_operation(
        &self,
        handle: &OperationHandle,
        credential: &Credential,
        timeout: Duration,
        job: &JobId,
    ) -> Result<ArtifactLocator, RemoteError> {
        let config = self.state.runner_config;
        let started = Instant::now();
        let deadline = started + timeout;
        let mut last_report = started;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.interrupted(job).await);
            }
            if Instant::now() >= deadline {
                return Err(RemoteError::Timeout(timeout));
            }

            let polled = match self
                .guarded(deadline, self.state.remote.poll(handle, credential))
                .await
            {
                Ok(polled) => polled,
                Err(Cut::Cancelled) => return Err(self.interrupted(job).await),
                Err(Cut::Deadline) => return Err(RemoteError::Timeout(timeout)),
            };

            match polled {
                Ok(PollStatus::Succeeded(locator)) => return Ok(locator),
                Ok(PollStatus::Failed(reason)) => return Err(RemoteError::OperationFailed(reason)),
                Ok(PollStatus::Pending(raw)) => {
                    debug!(task_id = %self.task_id, job_id = %job, status = %raw, "Operation pending");
                    if last_report.elapsed() >= config.progress_log_interval {
                        self.log(format!(
                            "[{}] Still waiting after {}s ({})",
                            job,
                            started.elapsed().as_secs(),
                            raw
                        ))
                        .await;
                        last_report = Instant::now();
                    }
                }
                Err(RemoteError::Unauthorized) => {
                    warn!(task_id = %self.task_id, job_id = %job, "Access token rejected while polling");
                    self.log(format!(
                        "[{}] Access token rejected (401); it may have expired",
                        job
                    ))
                    .await;
                    return Err(RemoteError::Unauthorized);
                }
                Err(e) => return Err(e),
            }

            // Either cut is picked up at the top of the loop.
            let _ = self.guarded(deadline, sleep(config.poll_interval)).await;
        }
    }

    async fn interrupted(&self, job: &JobId) -> RemoteError {
        self.log(format!("[{}] Interrupted while waiting", job)).await;
        RemoteError::Interrupted
    }
}

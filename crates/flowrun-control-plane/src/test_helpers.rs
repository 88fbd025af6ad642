//! Scripted collaborators for driving runners and the orchestrator in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use flowrun_core::{ResolutionTier, TaskKind, TaskState, WorkInput};

use crate::config::RunnerConfig;
use crate::history::InMemoryHistory;
use crate::registry::TaskEntry;
use crate::remote::{
    AllowAll, ArtifactDownloader, ArtifactLocator, Credential, DownloadError, OperationHandle,
    PollStatus, RemoteError, RemoteOperationClient, SchedulingPolicy,
};
use crate::state::{AppState, Collaborators};

/// How the scripted remote treats a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Succeed,
    /// `begin` is rejected.
    FailBegin,
    /// The operation reports failure.
    FailRemote,
    /// The operation stays pending forever.
    NeverFinish,
    /// Fails on the first attempt, succeeds afterwards.
    FailThenSucceed,
    /// Generation succeeds, the upscale request is rejected.
    EnhanceFails,
    /// Every poll request hangs without an answer.
    Stall,
}

#[derive(Debug, Clone, Copy)]
pub enum SessionFailure {
    Credential,
    Init,
}

/// Remote client whose behavior is keyed by item prompt.
#[derive(Default)]
pub struct ScriptedRemote {
    scripts: HashMap<String, Script>,
    session_failure: Option<SessionFailure>,
    begins: Mutex<HashMap<String, usize>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, prompt: &str, script: Script) -> Self {
        self.scripts.insert(prompt.to_string(), script);
        self
    }

    pub fn failing_session(mut self, failure: SessionFailure) -> Self {
        self.session_failure = Some(failure);
        self
    }

    /// How many times `begin` was called for `prompt`.
    pub fn begins(&self, prompt: &str) -> usize {
        self.begins
            .lock()
            .unwrap()
            .get(prompt)
            .copied()
            .unwrap_or(0)
    }

    fn script_for(&self, prompt: &str) -> Script {
        self.scripts.get(prompt).copied().unwrap_or(Script::Succeed)
    }
}

fn parse_handle(handle: &OperationHandle) -> (String, usize, String) {
    let mut parts = handle.as_str().splitn(3, '|');
    let stage = parts.next().unwrap_or_default().to_string();
    let attempt = parts.next().and_then(|a| a.parse().ok()).unwrap_or(1);
    let prompt = parts.next().unwrap_or_default().to_string();
    (stage, attempt, prompt)
}

#[async_trait]
impl RemoteOperationClient for ScriptedRemote {
    async fn open_session(&self, _kind: TaskKind) -> Result<Credential, RemoteError> {
        match self.session_failure {
            Some(SessionFailure::Credential) => {
                Err(RemoteError::Credential("no cookies configured".into()))
            }
            Some(SessionFailure::Init) => Err(RemoteError::Rejected {
                status: 503,
                body: "unavailable".into(),
            }),
            None => Ok(Credential::new("Bearer test")),
        }
    }

    async fn begin(
        &self,
        _kind: TaskKind,
        input: &WorkInput,
        _credential: &Credential,
    ) -> Result<OperationHandle, RemoteError> {
        let prompt = input.prompt().to_string();
        let attempt = {
            let mut begins = self.begins.lock().unwrap();
            let count = begins.entry(prompt.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if self.script_for(&prompt) == Script::FailBegin {
            return Err(RemoteError::Rejected {
                status: 400,
                body: "prompt rejected".into(),
            });
        }
        Ok(OperationHandle::new(format!("op|{}|{}", attempt, prompt)))
    }

    async fn poll(
        &self,
        handle: &OperationHandle,
        _credential: &Credential,
    ) -> Result<PollStatus, RemoteError> {
        let (stage, attempt, prompt) = parse_handle(handle);
        if self.script_for(&prompt) == Script::Stall {
            return std::future::pending().await;
        }
        if stage == "up" {
            return Ok(PollStatus::Succeeded(ArtifactLocator::new(format!(
                "mem://{}/1080p",
                prompt
            ))));
        }
        let status = match self.script_for(&prompt) {
            Script::FailRemote => PollStatus::Failed("MEDIA_GENERATION_STATUS_FAILED".into()),
            Script::NeverFinish => PollStatus::Pending("MEDIA_GENERATION_STATUS_ACTIVE".into()),
            Script::FailThenSucceed if attempt == 1 => {
                PollStatus::Failed("MEDIA_GENERATION_STATUS_FAILED".into())
            }
            _ => PollStatus::Succeeded(ArtifactLocator::new(format!("mem://{}/720p", prompt))),
        };
        Ok(status)
    }

    async fn begin_enhance(
        &self,
        source: &OperationHandle,
        _credential: &Credential,
    ) -> Result<OperationHandle, RemoteError> {
        let (_, attempt, prompt) = parse_handle(source);
        if self.script_for(&prompt) == Script::EnhanceFails {
            return Err(RemoteError::Rejected {
                status: 500,
                body: "upscale unavailable".into(),
            });
        }
        Ok(OperationHandle::new(format!("up|{}|{}", attempt, prompt)))
    }
}

/// Downloader that records fetches without touching the network.
#[derive(Default)]
pub struct FakeDownloader {
    fetched: Mutex<Vec<(ArtifactLocator, PathBuf)>>,
    cancel_after: Mutex<Option<(usize, Arc<TaskEntry>)>>,
    stall: AtomicBool,
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of `entry` right after the `count`th fetch.
    pub fn cancel_after(&self, count: usize, entry: Arc<TaskEntry>) {
        *self.cancel_after.lock().unwrap() = Some((count, entry));
    }

    /// Make every later fetch hang without finishing.
    pub fn stall(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    pub fn fetched(&self) -> Vec<(ArtifactLocator, PathBuf)> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactDownloader for FakeDownloader {
    async fn fetch(&self, locator: &ArtifactLocator, dest: &Path) -> Result<u64, DownloadError> {
        let count = {
            let mut fetched = self.fetched.lock().unwrap();
            fetched.push((locator.clone(), dest.to_path_buf()));
            fetched.len()
        };
        let trigger = {
            let guard = self.cancel_after.lock().unwrap();
            guard
                .as_ref()
                .filter(|(after, _)| *after == count)
                .map(|(_, entry)| entry.clone())
        };
        if let Some(entry) = trigger {
            let _ = entry.request_cancel().await;
        }
        if self.stall.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        Ok(1024)
    }
}

/// Millisecond timings so runner tests finish quickly.
pub fn fast_config() -> RunnerConfig {
    RunnerConfig {
        poll_interval: Duration::from_millis(2),
        poll_timeout: Duration::from_millis(500),
        enhance_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_millis(500),
        download_timeout: Duration::from_millis(500),
        cooldown: Duration::from_millis(1),
        progress_log_interval: Duration::from_millis(10),
    }
}

pub fn app_state(
    remote: Arc<ScriptedRemote>,
    downloader: Arc<FakeDownloader>,
    policy: Arc<dyn SchedulingPolicy>,
    config: RunnerConfig,
) -> Arc<AppState> {
    AppState::new(
        Collaborators {
            remote,
            downloader,
            history: Arc::new(InMemoryHistory::new()),
            policy,
        },
        config,
        "/tmp/flowrun-test-artifacts",
    )
}

/// State with a scripted remote, a fake downloader and no submission limits.
pub fn default_state(remote: Arc<ScriptedRemote>, downloader: Arc<FakeDownloader>) -> Arc<AppState> {
    app_state(remote, downloader, Arc::new(AllowAll), fast_config())
}

pub fn prompts(texts: &[&str]) -> Vec<WorkInput> {
    texts
        .iter()
        .map(|text| WorkInput::Prompt {
            prompt: text.to_string(),
        })
        .collect()
}

/// Register a prompt-to-video task directly in the registry.
pub async fn register(
    state: &Arc<AppState>,
    resolution: ResolutionTier,
    texts: &[&str],
) -> (TaskState, Arc<TaskEntry>) {
    register_inputs(state, TaskKind::PromptToVideo, resolution, prompts(texts)).await
}

/// Register an image-to-video task from `(image, prompt)` pairs.
pub async fn register_images(
    state: &Arc<AppState>,
    resolution: ResolutionTier,
    pairs: &[(&str, &str)],
) -> (TaskState, Arc<TaskEntry>) {
    let inputs = pairs
        .iter()
        .map(|(image, prompt)| WorkInput::Image {
            image: image.to_string(),
            prompt: prompt.to_string(),
        })
        .collect();
    register_inputs(state, TaskKind::ImageToVideo, resolution, inputs).await
}

async fn register_inputs(
    state: &Arc<AppState>,
    kind: TaskKind,
    resolution: ResolutionTier,
    inputs: Vec<WorkInput>,
) -> (TaskState, Arc<TaskEntry>) {
    let task = TaskState::new("alice", kind, resolution, inputs);
    let entry = state.registry.create(task.clone()).await.unwrap();
    (task, entry)
}

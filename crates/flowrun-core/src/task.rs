//! Task and Work Item types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, ItemStatus, TaskId, TaskStatus};

/// What a task generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Text prompt to video.
    #[serde(rename = "P2V", alias = "prompt_to_video", alias = "PromptToVideo")]
    PromptToVideo,
    /// Start image plus prompt to video.
    #[serde(rename = "I2V", alias = "image_to_video", alias = "ImageToVideo")]
    ImageToVideo,
}

impl TaskKind {
    /// Short code used on the wire and in history records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PromptToVideo => "P2V",
            Self::ImageToVideo => "I2V",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TaskKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p2v" | "prompt_to_video" | "prompttovideo" => Ok(Self::PromptToVideo),
            "i2v" | "image_to_video" | "imagetovideo" => Ok(Self::ImageToVideo),
            _ => Err(CoreError::UnknownKind(s.to_string())),
        }
    }
}

/// Whether finished artifacts get an extra enhance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionTier {
    #[default]
    #[serde(rename = "720p", alias = "standard", alias = "Standard")]
    Standard,
    #[serde(rename = "1080p", alias = "upscaled", alias = "Upscaled")]
    Upscaled,
}

impl ResolutionTier {
    /// Label used in artifact names.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Standard => "720p",
            Self::Upscaled => "1080p",
        }
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ResolutionTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "720p" | "standard" => Ok(Self::Standard),
            "1080p" | "upscaled" => Ok(Self::Upscaled),
            _ => Err(CoreError::UnknownResolution(s.to_string())),
        }
    }
}

/// Input for one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkInput {
    /// Image reference plus prompt (image-to-video).
    Image { image: String, prompt: String },
    /// Prompt text (prompt-to-video).
    Prompt { prompt: String },
}

impl WorkInput {
    pub fn prompt(&self) -> &str {
        match self {
            Self::Image { prompt, .. } | Self::Prompt { prompt } => prompt,
        }
    }

    pub fn image(&self) -> Option<&str> {
        match self {
            Self::Image { image, .. } => Some(image),
            Self::Prompt { .. } => None,
        }
    }

    /// Returns true if this input shape belongs to the given kind.
    pub fn matches_kind(&self, kind: TaskKind) -> bool {
        matches!(
            (self, kind),
            (Self::Prompt { .. }, TaskKind::PromptToVideo)
                | (Self::Image { .. }, TaskKind::ImageToVideo)
        )
    }
}

/// One unit of generation work inside a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// What to generate.
    pub input: WorkInput,

    status: ItemStatus,

    /// Artifact file name, empty until the item is Finished.
    #[serde(default)]
    output_artifact_name: String,

    /// Set once the item has re-entered Running for the retry pass.
    #[serde(default)]
    retried: bool,
}

impl WorkItem {
    /// Create a Pending item.
    pub fn new(input: WorkInput) -> Self {
        Self {
            input,
            status: ItemStatus::Pending,
            output_artifact_name: String::new(),
            retried: false,
        }
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn output_artifact_name(&self) -> &str {
        &self.output_artifact_name
    }

    /// Returns true once the item has been through the retry pass.
    pub fn retried(&self) -> bool {
        self.retried
    }

    /// Move to `next`, enforcing the transition graph.
    ///
    /// The retry re-entry (`Error -> Running`) is allowed once; after it a
    /// failure must be recorded as `ErrorRetried`, never as plain `Error`.
    pub fn transition(&mut self, next: ItemStatus) -> Result<(), CoreError> {
        let from = self.status;
        let invalid = CoreError::InvalidTransition { from, to: next };

        if !from.can_transition_to(next) {
            return Err(invalid);
        }

        match (from, next) {
            (ItemStatus::Error, ItemStatus::Running) if self.retried => return Err(invalid),
            (ItemStatus::Running, ItemStatus::Error) if self.retried => return Err(invalid),
            (ItemStatus::Running, ItemStatus::ErrorRetried) if !self.retried => {
                return Err(invalid)
            }
            (ItemStatus::Error, _) => self.retried = true,
            _ => {}
        }

        self.status = next;
        Ok(())
    }

    /// Mark the item Finished with the name of its stored artifact.
    pub fn finish(&mut self, artifact_name: impl Into<String>) -> Result<(), CoreError> {
        self.transition(ItemStatus::Finished)?;
        self.output_artifact_name = artifact_name.into();
        Ok(())
    }
}

/// One timestamped line of a task's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// The full record of one submitted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    /// Unique task identifier.
    pub id: TaskId,

    /// Who submitted the task.
    pub owner: String,

    pub kind: TaskKind,

    pub resolution: ResolutionTier,

    /// Items in processing order.
    pub items: Vec<WorkItem>,

    /// Overall task status.
    pub status: TaskStatus,

    /// Items that ended Finished.
    pub completed: usize,

    /// Items currently in Error or ErrorRetried.
    pub errors: usize,

    /// Percentage of items Finished, 0..=100.
    pub progress: u8,

    /// Append-only narrative of the run.
    pub log: Vec<LogEntry>,

    /// Set once a cancel request was accepted; never reset.
    pub cancel_requested: bool,

    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
}

impl TaskState {
    /// Create a new task with every item Pending.
    pub fn new(
        owner: impl Into<String>,
        kind: TaskKind,
        resolution: ResolutionTier,
        inputs: Vec<WorkInput>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            owner: owner.into(),
            kind,
            resolution,
            items: inputs.into_iter().map(WorkItem::new).collect(),
            status: TaskStatus::Initializing,
            completed: 0,
            errors: 0,
            progress: 0,
            log: Vec::new(),
            cancel_requested: false,
            created_at: Utc::now(),
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Number of items in the task.
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Append a timestamped line to the log.
    pub fn append_log(&mut self, message: impl Into<String>) -> &LogEntry {
        self.log.push(LogEntry {
            at: Utc::now(),
            message: message.into(),
        });
        &self.log[self.log.len() - 1]
    }

    /// Change one item's status.
    ///
    /// `artifact` is only used for `Finished`. Returns the previous status.
    pub fn set_item_status(
        &mut self,
        index: usize,
        status: ItemStatus,
        artifact: Option<String>,
    ) -> Result<ItemStatus, CoreError> {
        let len = self.items.len();
        let item = self
            .items
            .get_mut(index)
            .ok_or(CoreError::ItemOutOfRange { index, len })?;
        let previous = item.status();
        match (status, artifact) {
            (ItemStatus::Finished, Some(name)) => item.finish(name)?,
            (status, _) => item.transition(status)?,
        }
        Ok(previous)
    }

    /// Store the aggregate counters and recompute progress.
    pub fn set_counters(&mut self, completed: usize, errors: usize) -> Result<(), CoreError> {
        if completed + errors > self.total() {
            return Err(CoreError::InvalidInput(format!(
                "completed ({}) + errors ({}) exceeds total items ({})",
                completed,
                errors,
                self.total()
            )));
        }
        self.completed = completed;
        self.errors = errors;
        self.progress = progress_percent(completed, self.total());
        Ok(())
    }

    /// Mark every still-Pending item Stopped. Returns how many changed.
    pub fn stop_pending(&mut self) -> usize {
        let mut stopped = 0;
        for item in &mut self.items {
            if item.status() == ItemStatus::Pending && item.transition(ItemStatus::Stopped).is_ok()
            {
                stopped += 1;
            }
        }
        stopped
    }

    /// Count items currently in the given status.
    pub fn count_items(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|i| i.status() == status).count()
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// `completed / total` as a whole percentage; 0 when there are no items.
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = completed.min(total) * 100 / total;
    pct as u8
}

//! Status enums for Tasks and Work Items.
//!
//! Both enums render to the labels shown to task owners ("Error (Retried)",
//! "Error (Init)") and parse back through one normalization function each.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Why a task ended in [`TaskStatus::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorReason {
    /// Remote execution context could not be opened.
    Init,
    /// Access credentials could not be attached.
    Credential,
    /// The runner could not keep the task's bookkeeping consistent.
    Internal,
}

impl ErrorReason {
    fn label(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::Credential => "Credential",
            Self::Internal => "Internal",
        }
    }
}

/// Overall status of a Task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TaskStatus {
    /// Task registered, runner setting up its remote context.
    #[default]
    Initializing,
    /// Runner is working through the items.
    Running,
    /// Main pass and retry pass ran to completion.
    Finished,
    /// Cancelled by the owner or an elevated caller.
    Stopped,
    /// Setup failed and no items ran, or the runner aborted.
    Error(ErrorReason),
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Stopped | Self::Error(_))
    }

    /// Returns true while a cancel request can still take effect.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Initializing | Self::Running)
    }

    /// Map a free-form status label onto the canonical enum.
    ///
    /// Accepts the display labels, bare variant names in any case, and
    /// `snake_case`/`SCREAMING_SNAKE_CASE` spellings.
    pub fn normalize(raw: &str) -> Result<Self, CoreError> {
        let key = normalize_key(raw);
        let status = match key.as_str() {
            "initializing" | "init" => Self::Initializing,
            "running" => Self::Running,
            "finished" | "completed" => Self::Finished,
            "stopped" | "cancelled" => Self::Stopped,
            "error_init" | "errorinit" => Self::Error(ErrorReason::Init),
            "error_credential" | "error_cookie" | "errorcredential" => {
                Self::Error(ErrorReason::Credential)
            }
            "error_internal" | "errorinternal" => Self::Error(ErrorReason::Internal),
            _ => return Err(CoreError::UnknownStatus(raw.to_string())),
        };
        Ok(status)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => f.write_str("Initializing"),
            Self::Running => f.write_str("Running"),
            Self::Finished => f.write_str("Finished"),
            Self::Stopped => f.write_str("Stopped"),
            Self::Error(reason) => write!(f, "Error ({})", reason.label()),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, CoreError> {
        Self::normalize(&value)
    }
}

/// Status of a single Work Item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ItemStatus {
    #[default]
    Pending,
    Running,
    Finished,
    /// Failed on the main pass, queued for the retry pass.
    Error,
    /// Failed again on the retry pass.
    ErrorRetried,
    /// Never started because the task was cancelled.
    Stopped,
}

impl ItemStatus {
    /// Returns true if no further transition is legal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::ErrorRetried | Self::Stopped)
    }

    /// Returns true for both failure variants.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::ErrorRetried)
    }

    /// Edge check against the item transition graph.
    ///
    /// `Error -> Running` is the retry re-entry; [`crate::WorkItem`] limits it
    /// to one use per item.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Stopped)
                | (Running, Finished)
                | (Running, Error)
                | (Running, ErrorRetried)
                | (Running, Stopped)
                | (Error, Running)
                | (Error, ErrorRetried)
        )
    }

    /// Map a free-form status label onto the canonical enum.
    pub fn normalize(raw: &str) -> Result<Self, CoreError> {
        let key = normalize_key(raw);
        let status = match key.as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "finished" | "completed" | "done" => Self::Finished,
            "error" | "failed" => Self::Error,
            "error_retried" | "errorretried" => Self::ErrorRetried,
            "stopped" | "cancelled" => Self::Stopped,
            _ => return Err(CoreError::UnknownStatus(raw.to_string())),
        };
        Ok(status)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Finished => "Finished",
            Self::Error => "Error",
            Self::ErrorRetried => "Error (Retried)",
            Self::Stopped => "Stopped",
        };
        f.write_str(label)
    }
}

impl FromStr for ItemStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl From<ItemStatus> for String {
    fn from(status: ItemStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for ItemStatus {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, CoreError> {
        Self::normalize(&value)
    }
}

/// Lowercase, turn `(`, `)`, spaces and dashes into `_`, squeeze repeats.
fn normalize_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let c = match c {
            ' ' | '-' | '(' | ')' => '_',
            other => other.to_ascii_lowercase(),
        };
        if c == '_' && (key.is_empty() || key.ends_with('_')) {
            continue;
        }
        key.push(c);
    }
    key.trim_end_matches('_').to_string()
}

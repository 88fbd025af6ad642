//! Core domain errors.

use thiserror::Error;

use crate::ItemStatus;

/// Core domain errors for FlowRun.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Item status change outside the allowed transition graph.
    #[error("Invalid item transition: {from} -> {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },

    /// Item index past the end of the task's item list.
    #[error("Item index {index} out of range (task has {len} items)")]
    ItemOutOfRange { index: usize, len: usize },

    /// Task kind string not recognized.
    #[error("Unknown task kind: {0}")]
    UnknownKind(String),

    /// Resolution string not recognized.
    #[error("Unknown resolution tier: {0}")]
    UnknownResolution(String),

    /// Status string not recognized.
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

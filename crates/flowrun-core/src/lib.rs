//! FlowRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Storage
//! - Runtime specifics
//!
//! All types here represent the task/work-item domain of FlowRun.

pub mod error;
pub mod history;
pub mod ids;
pub mod naming;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use history::HistoryRecord;
pub use ids::{JobId, TaskId};
pub use status::{ErrorReason, ItemStatus, TaskStatus};
pub use task::{LogEntry, ResolutionTier, TaskKind, TaskState, WorkInput, WorkItem};

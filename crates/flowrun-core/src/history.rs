//! Per-owner task history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ResolutionTier, TaskId, TaskKind, TaskState, TaskStatus, WorkItem};

/// Snapshot written to the owner's history whenever a task changes status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub task_id: TaskId,
    pub time: DateTime<Utc>,
    pub status: TaskStatus,
    pub kind: TaskKind,
    pub resolution: ResolutionTier,
    pub total_items: usize,
    pub items: Vec<WorkItem>,
}

impl HistoryRecord {
    /// Build a record from the current task state, stamped now.
    pub fn from_state(state: &TaskState) -> Self {
        Self {
            task_id: state.id.clone(),
            time: Utc::now(),
            status: state.status,
            kind: state.kind,
            resolution: state.resolution,
            total_items: state.total(),
            items: state.items.clone(),
        }
    }

    /// Fold a newer record for the same task into this one.
    pub fn merge(&mut self, newer: HistoryRecord) {
        self.status = newer.status;
        self.time = newer.time;
        self.items = newer.items;
    }
}

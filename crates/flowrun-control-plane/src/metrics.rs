//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::Arc;

use flowrun_core::{ItemStatus, TaskState, TaskStatus};

use crate::state::AppState;

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let tasks = state.registry.all().await;
    let mut output = String::new();

    write_task_metrics(&tasks, &mut output);
    write_item_metrics(&tasks, &mut output);

    output
}

/// Tasks by overall status.
fn write_task_metrics(tasks: &[TaskState], output: &mut String) {
    let mut initializing = 0u64;
    let mut running = 0u64;
    let mut finished = 0u64;
    let mut stopped = 0u64;
    let mut error = 0u64;

    for task in tasks {
        match task.status {
            TaskStatus::Initializing => initializing += 1,
            TaskStatus::Running => running += 1,
            TaskStatus::Finished => finished += 1,
            TaskStatus::Stopped => stopped += 1,
            TaskStatus::Error(_) => error += 1,
        }
    }

    writeln!(
        output,
        "# HELP flowrun_tasks_total Total number of tasks by status"
    )
    .ok();
    writeln!(output, "# TYPE flowrun_tasks_total gauge").ok();
    writeln!(
        output,
        "flowrun_tasks_total{{status=\"initializing\"}} {initializing}"
    )
    .ok();
    writeln!(output, "flowrun_tasks_total{{status=\"running\"}} {running}").ok();
    writeln!(output, "flowrun_tasks_total{{status=\"finished\"}} {finished}").ok();
    writeln!(output, "flowrun_tasks_total{{status=\"stopped\"}} {stopped}").ok();
    writeln!(output, "flowrun_tasks_total{{status=\"error\"}} {error}").ok();
}

/// Work items across all tasks by status.
fn write_item_metrics(tasks: &[TaskState], output: &mut String) {
    let labels = [
        (ItemStatus::Pending, "pending"),
        (ItemStatus::Running, "running"),
        (ItemStatus::Finished, "finished"),
        (ItemStatus::Error, "error"),
        (ItemStatus::ErrorRetried, "error_retried"),
        (ItemStatus::Stopped, "stopped"),
    ];

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP flowrun_items_total Total number of work items by status"
    )
    .ok();
    writeln!(output, "# TYPE flowrun_items_total gauge").ok();
    for (status, label) in labels {
        let count: usize = tasks.iter().map(|t| t.count_items(status)).sum();
        writeln!(output, "flowrun_items_total{{status=\"{label}\"}} {count}").ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{default_state, register, FakeDownloader, ScriptedRemote};
    use flowrun_core::ResolutionTier;

    #[tokio::test]
    async fn test_collect_metrics_empty_state() {
        let state = default_state(
            Arc::new(ScriptedRemote::new()),
            Arc::new(FakeDownloader::new()),
        );
        let output = collect_metrics(&state).await;

        assert!(output.contains("flowrun_tasks_total"));
        assert!(output.contains("flowrun_items_total"));
        assert!(output.contains("flowrun_tasks_total{status=\"running\"} 0"));
        assert!(output.contains("flowrun_items_total{status=\"error_retried\"} 0"));
    }

    #[tokio::test]
    async fn test_collect_metrics_counts_items() {
        let state = default_state(
            Arc::new(ScriptedRemote::new()),
            Arc::new(FakeDownloader::new()),
        );
        register(&state, ResolutionTier::Standard, &["a", "b", "c"]).await;

        let output = collect_metrics(&state).await;
        assert!(output.contains("flowrun_tasks_total{status=\"initializing\"} 1"));
        assert!(output.contains("flowrun_items_total{status=\"pending\"} 3"));
    }
}

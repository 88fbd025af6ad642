//! Task handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::info;

use flowrun_core::TaskId;

use crate::http::responses::{ApiError, ListQuery, SubmitBody, SubmitResponse, TaskSummary};
use crate::orchestrator::{Orchestrator, Requester, SubmitRequest};

/// Submit a batch of work items.
pub async fn submit_task(
    State(orchestrator): State<Orchestrator>,
    requester: Requester,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let (kind, resolution, items) = body.into_inputs();
    let task_id = orchestrator
        .submit(
            &requester,
            SubmitRequest {
                kind,
                resolution,
                items,
            },
        )
        .await?;
    Ok(Json(SubmitResponse {
        task_id: task_id.into_inner(),
    }))
}

/// List the requester's tasks, or every task with `?all=true`.
pub async fn list_tasks(
    State(orchestrator): State<Orchestrator>,
    requester: Requester,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = if query.all {
        orchestrator.query_all(&requester).await?
    } else {
        orchestrator.query(&requester.name).await
    };
    let summaries: Vec<TaskSummary> = tasks.iter().map(TaskSummary::from).collect();
    Ok(Json(summaries))
}

/// Full state of one task, including items and log.
pub async fn get_task(
    State(orchestrator): State<Orchestrator>,
    requester: Requester,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = orchestrator.get(&TaskId::new(id), &requester).await?;
    Ok(Json(task))
}

/// Request cancellation of a task.
pub async fn cancel_task(
    State(orchestrator): State<Orchestrator>,
    requester: Requester,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = TaskId::new(id);
    orchestrator.cancel(&task_id, &requester).await?;
    info!(task_id = %task_id, "Cancel accepted via HTTP");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "task_id": task_id, "cancel_requested": true })),
    ))
}

/// The requester's task history, grouped by day.
pub async fn get_history(
    State(orchestrator): State<Orchestrator>,
    requester: Requester,
) -> Result<impl IntoResponse, ApiError> {
    let history = orchestrator
        .state()
        .history
        .for_owner(&requester.name)
        .await?;
    Ok(Json(history))
}

//! HTTP request and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use flowrun_core::{ResolutionTier, TaskKind, TaskState, TaskStatus, WorkInput};

use crate::history::HistoryError;
use crate::orchestrator::OrchestratorError;

// ============================================================================
// Submission types
// ============================================================================

/// Request body for `POST /v1/tasks`.
#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub kind: String,

    #[serde(default)]
    pub resolution: Option<String>,

    /// Prompt-to-video items, one prompt each. Blank lines are skipped.
    #[serde(default)]
    pub prompts: Vec<String>,

    /// Image-to-video items.
    #[serde(default)]
    pub tasks: Vec<ImageTask>,
}

#[derive(Debug, Deserialize)]
pub struct ImageTask {
    pub image: String,
    pub prompt: String,
}

impl SubmitBody {
    /// Work inputs in submission order: prompts first, then image tasks.
    pub fn into_inputs(self) -> (String, Option<String>, Vec<WorkInput>) {
        let mut items: Vec<WorkInput> = self
            .prompts
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(|prompt| WorkInput::Prompt { prompt })
            .collect();
        items.extend(self.tasks.into_iter().map(|t| WorkInput::Image {
            image: t.image,
            prompt: t.prompt,
        }));
        (self.kind, self.resolution, items)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

/// Query string for `GET /v1/tasks`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub all: bool,
}

/// One row of a task listing.
#[derive(Debug, Serialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub owner: String,
    pub kind: TaskKind,
    pub resolution: ResolutionTier,
    pub status: TaskStatus,
    pub total_items: usize,
    pub completed: usize,
    pub errors: usize,
    pub progress: u8,
    pub cancel_requested: bool,
    pub created_at: String,
}

impl From<&TaskState> for TaskSummary {
    fn from(task: &TaskState) -> Self {
        Self {
            task_id: task.id.as_str().to_string(),
            owner: task.owner.clone(),
            kind: task.kind,
            resolution: task.resolution,
            status: task.status,
            total_items: task.total(),
            completed: task.completed,
            errors: task.errors,
            progress: task.progress,
            cancel_requested: task.cancel_requested,
            created_at: task.created_at.to_rfc3339(),
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Errors surfaced by the HTTP API.
#[derive(Debug)]
pub enum ApiError {
    /// No requester identity on the request.
    Unauthorized,
    Orchestrator(OrchestratorError),
    History(HistoryError),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self::Orchestrator(err)
    }
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        Self::History(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing requester identity".to_string(),
            ),
            ApiError::Orchestrator(err) => {
                let (status, code) = match &err {
                    OrchestratorError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    OrchestratorError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
                    OrchestratorError::NotAllowed(_) => (StatusCode::FORBIDDEN, "not_allowed"),
                    OrchestratorError::InvalidKind(_) => (StatusCode::BAD_REQUEST, "invalid_kind"),
                    OrchestratorError::InvalidResolution(_) => {
                        (StatusCode::BAD_REQUEST, "invalid_resolution")
                    }
                    OrchestratorError::InvalidItem { .. } => {
                        (StatusCode::BAD_REQUEST, "invalid_item")
                    }
                    OrchestratorError::NotCancellable(_) => {
                        (StatusCode::CONFLICT, "not_cancellable")
                    }
                    OrchestratorError::Registry(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                    }
                };
                (status, code, err.to_string())
            }
            ApiError::History(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "history_unavailable",
                err.to_string(),
            ),
        };

        (status, Json(ErrorResponse { error: message, code })).into_response()
    }
}

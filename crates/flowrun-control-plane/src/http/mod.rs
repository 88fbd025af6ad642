//! HTTP server for the control plane.
//!
//! Provides endpoints for:
//! - Task submission, listing and cancellation (`/v1/tasks`)
//! - Per-owner history (`/v1/history`)
//! - Live progress notifications (`/v1/events`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)
//!
//! The requester is read from headers set by the authentication proxy in
//! front of this server.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::orchestrator::{Orchestrator, Requester};

mod handlers;
pub mod responses;

use responses::ApiError;

pub const USER_HEADER: &str = "x-flowrun-user";
pub const TEAM_HEADER: &str = "x-flowrun-team";
pub const ELEVATED_HEADER: &str = "x-flowrun-elevated";

/// Create the HTTP router.
pub fn create_router(orchestrator: Orchestrator) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // API routes
        .route(
            "/v1/tasks",
            post(handlers::submit_task).get(handlers::list_tasks),
        )
        .route("/v1/tasks/:id", get(handlers::get_task))
        .route("/v1/tasks/:id/cancel", post(handlers::cancel_task))
        .route("/v1/history", get(handlers::get_history))
        .route("/v1/events", get(handlers::task_events))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(orchestrator)
}

#[async_trait]
impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let name = header(USER_HEADER).ok_or(ApiError::Unauthorized)?;
        let team = header(TEAM_HEADER).unwrap_or_default();
        let elevated = header(ELEVATED_HEADER)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Requester {
            name,
            team,
            elevated,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::*;
    use crate::test_helpers::{default_state, FakeDownloader, ScriptedRemote};

    async fn serve() -> String {
        let state = default_state(
            Arc::new(ScriptedRemote::new()),
            Arc::new(FakeDownloader::new()),
        );
        let app = create_router(Orchestrator::new(state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_health() {
        let base = serve().await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_identity_is_401() {
        let base = serve().await;
        let response = reqwest::get(format!("{base}/v1/tasks")).await.unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn test_submit_list_get_cancel() {
        let base = serve().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/v1/tasks"))
            .header(USER_HEADER, "alice")
            .header(TEAM_HEADER, "studio")
            .json(&json!({"kind": "P2V", "prompts": ["a cat", "  ", "a dog"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let submitted: responses::SubmitResponse = response.json().await.unwrap();

        let list: Vec<Value> = client
            .get(format!("{base}/v1/tasks"))
            .header(USER_HEADER, "alice")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["total_items"], 2);

        let other = client
            .get(format!("{base}/v1/tasks/{}", submitted.task_id))
            .header(USER_HEADER, "bob")
            .send()
            .await
            .unwrap();
        assert_eq!(other.status(), 403);

        let missing = client
            .post(format!("{base}/v1/tasks/nope/cancel"))
            .header(USER_HEADER, "alice")
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        let mut task = Value::Null;
        for _ in 0..200 {
            task = client
                .get(format!("{base}/v1/tasks/{}", submitted.task_id))
                .header(USER_HEADER, "alice")
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if task["status"] == "Finished" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(task["status"], "Finished");
        assert_eq!(task["items"][1]["status"], "Finished");

        let late = client
            .post(format!("{base}/v1/tasks/{}/cancel", submitted.task_id))
            .header(USER_HEADER, "alice")
            .send()
            .await
            .unwrap();
        assert_eq!(late.status(), 409);
    }

    #[tokio::test]
    async fn test_submit_invalid_kind_is_400() {
        let base = serve().await;
        let response = reqwest::Client::new()
            .post(format!("{base}/v1/tasks"))
            .header(USER_HEADER, "alice")
            .json(&json!({"kind": "T2A", "prompts": ["x"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "invalid_kind");
    }

    #[tokio::test]
    async fn test_list_all_requires_elevation() {
        let base = serve().await;
        let client = reqwest::Client::new();
        let denied = client
            .get(format!("{base}/v1/tasks?all=true"))
            .header(USER_HEADER, "alice")
            .send()
            .await
            .unwrap();
        assert_eq!(denied.status(), 403);

        let allowed = client
            .get(format!("{base}/v1/tasks?all=true"))
            .header(USER_HEADER, "root")
            .header(ELEVATED_HEADER, "true")
            .send()
            .await
            .unwrap();
        assert_eq!(allowed.status(), 200);
    }
}

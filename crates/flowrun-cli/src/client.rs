//! HTTP client for the control plane REST API.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use flowrun_core::TaskState;

/// Errors that can occur when talking to the control plane.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error body.
    #[error("{status}: {message}")]
    Api { status: u16, message: String },
}

/// Who the CLI acts as.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: String,
    pub team: String,
    pub elevated: bool,
}

/// HTTP client for REST API endpoints.
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: String,
    identity: Identity,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(base_url: &str, identity: Identity) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            identity,
        }
    }

    /// Check if the control plane is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        debug!(url = %url, "Checking health");

        let response = self.inner.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    pub async fn submit(&self, body: &serde_json::Value) -> Result<String, ClientError> {
        let reply: serde_json::Value = self.post_json("/v1/tasks", body).await?;
        Ok(reply["task_id"].as_str().unwrap_or_default().to_string())
    }

    pub async fn list(&self, all: bool) -> Result<Vec<serde_json::Value>, ClientError> {
        let path = if all { "/v1/tasks?all=true" } else { "/v1/tasks" };
        self.get_json(path).await
    }

    pub async fn get(&self, id: &str) -> Result<TaskState, ClientError> {
        self.get_json(&format!("/v1/tasks/{}", id)).await
    }

    pub async fn cancel(&self, id: &str) -> Result<(), ClientError> {
        let _: serde_json::Value = self
            .post_json(&format!("/v1/tasks/{}/cancel", id), &serde_json::json!({}))
            .await?;
        Ok(())
    }

    pub async fn history(&self) -> Result<serde_json::Value, ClientError> {
        self.get_json("/v1/history").await
    }

    /// Get JSON from an endpoint.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET request");

        let response = self.with_identity(self.inner.get(&url)).send().await?;
        decode(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST request");

        let response = self
            .with_identity(self.inner.post(&url))
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    fn with_identity(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header("x-flowrun-user", &self.identity.user)
            .header("x-flowrun-team", &self.identity.team);
        if self.identity.elevated {
            request.header("x-flowrun-elevated", "true")
        } else {
            request
        }
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body["error"]
            .as_str()
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
            .to_string();
        return Err(ClientError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json().await?)
}

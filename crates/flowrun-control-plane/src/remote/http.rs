//! reqwest-backed remote generation client.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use flowrun_core::{TaskKind, WorkInput};

use super::{
    ArtifactLocator, Credential, OperationHandle, PollStatus, RemoteError, RemoteOperationClient,
};

/// Remote status strings, folded into three outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    Succeeded,
    Failed,
}

impl RemoteStatus {
    /// Anything that is not an explicit success or failure counts as pending.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim() {
            "MEDIA_GENERATION_STATUS_SUCCESSFUL" => Self::Succeeded,
            "MEDIA_GENERATION_STATUS_FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionReply {
    token: String,
}

#[derive(Debug, Serialize)]
struct BeginRequest<'a> {
    kind: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct EnhanceRequest<'a> {
    operation: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct OperationList {
    #[serde(default)]
    operations: Vec<OperationEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OperationEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    operation: OperationBody,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OperationBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing)]
    metadata: Option<Value>,
}

impl OperationList {
    fn single(name: &str) -> Self {
        Self {
            operations: vec![OperationEntry {
                status: None,
                operation: OperationBody {
                    name: Some(name.to_string()),
                    metadata: None,
                },
            }],
        }
    }

    fn first(self) -> Result<OperationEntry, RemoteError> {
        self.operations
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Malformed("empty operations list".to_string()))
    }
}

/// HTTP client for the remote generation service.
pub struct HttpRemoteClient {
    inner: reqwest::Client,
    base_url: String,
    credentials_path: Option<PathBuf>,
}

impl HttpRemoteClient {
    /// Create a new client for `base_url`. Every request gives up after
    /// `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials_path: None,
        })
    }

    /// Attach the cookie file sent when opening a session.
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    async fn cookie_header(&self) -> Result<Option<String>, RemoteError> {
        let Some(path) = &self.credentials_path else {
            return Ok(None);
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RemoteError::Credential(format!("{}: {}", path.display(), e)))?;
        parse_cookie_material(&raw).map(Some)
    }

    async fn post_operations<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        credential: &Credential,
    ) -> Result<OperationList, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST request");

        let response = self
            .inner
            .post(&url)
            .header(AUTHORIZATION, credential.as_str())
            .json(body)
            .send()
            .await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl RemoteOperationClient for HttpRemoteClient {
    async fn open_session(&self, kind: TaskKind) -> Result<Credential, RemoteError> {
        let cookies = self.cookie_header().await?;
        let url = format!("{}/v1/sessions", self.base_url);
        debug!(url = %url, kind = %kind, "Opening remote session");

        let mut request = self.inner.post(&url);
        if let Some(cookies) = cookies {
            request = request.header(COOKIE, cookies);
        }
        let response = check_status(request.send().await?).await?;
        let reply: SessionReply = response
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        if reply.token.trim().is_empty() {
            return Err(RemoteError::Malformed("empty session token".to_string()));
        }

        info!(kind = %kind, "Remote session opened");
        Ok(Credential::new(reply.token))
    }

    async fn begin(
        &self,
        kind: TaskKind,
        input: &WorkInput,
        credential: &Credential,
    ) -> Result<OperationHandle, RemoteError> {
        let body = BeginRequest {
            kind: kind.code(),
            prompt: input.prompt(),
            image: input.image(),
        };
        let reply = self
            .post_operations("/v1/operations", &body, credential)
            .await?;
        operation_name(reply)
    }

    async fn poll(
        &self,
        handle: &OperationHandle,
        credential: &Credential,
    ) -> Result<PollStatus, RemoteError> {
        let body = OperationList::single(handle.as_str());
        let entry = self
            .post_operations("/v1/operations:check", &body, credential)
            .await?
            .first()?;
        let raw = entry.status.unwrap_or_default();

        match RemoteStatus::normalize(&raw) {
            RemoteStatus::Pending => Ok(PollStatus::Pending(raw)),
            RemoteStatus::Failed => Ok(PollStatus::Failed(raw)),
            RemoteStatus::Succeeded => {
                let url = entry
                    .operation
                    .metadata
                    .as_ref()
                    .and_then(|m| m.pointer("/video/fifeUrl"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        RemoteError::Malformed("successful operation without video url".to_string())
                    })?;
                Ok(PollStatus::Succeeded(ArtifactLocator::new(url)))
            }
        }
    }

    async fn begin_enhance(
        &self,
        source: &OperationHandle,
        credential: &Credential,
    ) -> Result<OperationHandle, RemoteError> {
        let body = EnhanceRequest {
            operation: source.as_str(),
        };
        let reply = self
            .post_operations("/v1/operations:upscale", &body, credential)
            .await?;
        operation_name(reply)
    }
}

fn operation_name(reply: OperationList) -> Result<OperationHandle, RemoteError> {
    reply
        .first()?
        .operation
        .name
        .filter(|name| !name.is_empty())
        .map(OperationHandle::new)
        .ok_or_else(|| RemoteError::Malformed("operation without name".to_string()))
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(RemoteError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct CookieEntry {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CookieMaterial {
    List(Vec<CookieEntry>),
    Wrapped { cookies: Vec<CookieEntry> },
}

/// Turn a cookie export (a JSON list, or an object with a `cookies` list)
/// into a `Cookie` header value.
fn parse_cookie_material(raw: &str) -> Result<String, RemoteError> {
    let material: CookieMaterial = serde_json::from_str(raw)
        .map_err(|e| RemoteError::Credential(format!("unreadable cookie material: {}", e)))?;
    let cookies = match material {
        CookieMaterial::List(list) | CookieMaterial::Wrapped { cookies: list } => list,
    };
    if cookies.is_empty() {
        return Err(RemoteError::Credential("cookie material is empty".to_string()));
    }
    Ok(cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn credential() -> Credential {
        Credential::new("Bearer abc")
    }

    #[test]
    fn test_remote_status_normalize() {
        assert_eq!(
            RemoteStatus::normalize("MEDIA_GENERATION_STATUS_SUCCESSFUL"),
            RemoteStatus::Succeeded
        );
        assert_eq!(
            RemoteStatus::normalize("MEDIA_GENERATION_STATUS_FAILED"),
            RemoteStatus::Failed
        );
        assert_eq!(
            RemoteStatus::normalize("MEDIA_GENERATION_STATUS_ACTIVE"),
            RemoteStatus::Pending
        );
        assert_eq!(RemoteStatus::normalize(""), RemoteStatus::Pending);
    }

    #[test]
    fn test_cookie_material_shapes() {
        let list = r#"[{"name":"a","value":"1"},{"name":"b","value":"2"}]"#;
        assert_eq!(parse_cookie_material(list).unwrap(), "a=1; b=2");

        let wrapped = r#"{"cookies":[{"name":"sid","value":"x"}]}"#;
        assert_eq!(parse_cookie_material(wrapped).unwrap(), "sid=x");

        assert!(matches!(
            parse_cookie_material("not json"),
            Err(RemoteError::Credential(_))
        ));
        assert!(matches!(
            parse_cookie_material("[]"),
            Err(RemoteError::Credential(_))
        ));
    }

    #[tokio::test]
    async fn test_open_session_sends_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .and(header("cookie", "sid=x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "Bearer t1"})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cookie_file = dir.path().join("cookies.json");
        std::fs::write(&cookie_file, r#"[{"name":"sid","value":"x"}]"#).unwrap();

        let client = HttpRemoteClient::new(&server.uri(), TIMEOUT)
            .unwrap()
            .with_credentials_file(&cookie_file);
        let credential = client.open_session(TaskKind::PromptToVideo).await.unwrap();
        assert_eq!(credential.as_str(), "Bearer t1");
    }

    #[tokio::test]
    async fn test_open_session_missing_cookie_file() {
        let client = HttpRemoteClient::new("http://127.0.0.1:9", TIMEOUT)
            .unwrap()
            .with_credentials_file("/nonexistent/c.json");
        assert!(matches!(
            client.open_session(TaskKind::ImageToVideo).await,
            Err(RemoteError::Credential(_))
        ));
    }

    #[tokio::test]
    async fn test_begin_returns_operation_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/operations"))
            .and(header("authorization", "Bearer abc"))
            .and(body_json(json!({"kind": "I2V", "prompt": "wave", "image": "cat.png"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "operations": [{"operation": {"name": "op-1"}}]
            })))
            .mount(&server)
            .await;

        let client = HttpRemoteClient::new(&server.uri(), TIMEOUT).unwrap();
        let input = WorkInput::Image {
            image: "cat.png".into(),
            prompt: "wave".into(),
        };
        let handle = client
            .begin(TaskKind::ImageToVideo, &input, &credential())
            .await
            .unwrap();
        assert_eq!(handle.as_str(), "op-1");
    }

    #[tokio::test]
    async fn test_poll_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/operations:check"))
            .and(body_json(json!({"operations": [{"operation": {"name": "done"}}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "operations": [{
                    "status": "MEDIA_GENERATION_STATUS_SUCCESSFUL",
                    "operation": {"metadata": {"video": {"fifeUrl": "https://cdn/v.mp4"}}}
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/operations:check"))
            .and(body_json(json!({"operations": [{"operation": {"name": "busy"}}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "operations": [{"status": "MEDIA_GENERATION_STATUS_ACTIVE", "operation": {}}]
            })))
            .mount(&server)
            .await;

        let client = HttpRemoteClient::new(&server.uri(), TIMEOUT).unwrap();
        let done = client
            .poll(&OperationHandle::new("done"), &credential())
            .await
            .unwrap();
        assert_eq!(
            done,
            PollStatus::Succeeded(ArtifactLocator::new("https://cdn/v.mp4"))
        );

        let busy = client
            .poll(&OperationHandle::new("busy"), &credential())
            .await
            .unwrap();
        assert_eq!(
            busy,
            PollStatus::Pending("MEDIA_GENERATION_STATUS_ACTIVE".to_string())
        );
    }

    #[tokio::test]
    async fn test_unauthorized_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/operations:check"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/operations:upscale"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = HttpRemoteClient::new(&server.uri(), TIMEOUT).unwrap();
        assert!(matches!(
            client.poll(&OperationHandle::new("x"), &credential()).await,
            Err(RemoteError::Unauthorized)
        ));
        assert!(matches!(
            client
                .begin_enhance(&OperationHandle::new("x"), &credential())
                .await,
            Err(RemoteError::Rejected { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_stalled_request_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/operations:check"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"operations": []}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = HttpRemoteClient::new(&server.uri(), Duration::from_millis(100)).unwrap();
        let started = std::time::Instant::now();
        let result = client.poll(&OperationHandle::new("x"), &credential()).await;
        assert!(matches!(result, Err(RemoteError::Request(e)) if e.is_timeout()));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

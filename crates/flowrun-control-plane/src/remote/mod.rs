//! Collaborators the job runner talks to.
//!
//! The remote generation service, the artifact downloader and the submission
//! policy are traits so runners can be driven by scripted fakes in tests.

mod download;
mod http;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use flowrun_core::{TaskKind, WorkInput};

pub use download::HttpArtifactDownloader;
pub use http::HttpRemoteClient;

/// Access credential for one remote session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Handle of a long-running remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationHandle(String);

impl OperationHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a finished artifact can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocator(String);

impl ArtifactLocator {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Normalized result of one status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Still working; carries the raw remote status for logging.
    Pending(String),
    Succeeded(ArtifactLocator),
    Failed(String),
}

/// Errors from the remote generation service.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("credential error: {0}")]
    Credential(String),

    #[error("remote rejected the credential (401)")]
    Unauthorized,

    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("remote returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed remote response: {0}")]
    Malformed(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("operation did not finish within {0:?}")]
    Timeout(Duration),

    #[error("interrupted by cancel request")]
    Interrupted,
}

/// Errors while fetching an artifact.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("download returned status {0}")]
    Status(u16),

    #[error("download did not finish within {0:?}")]
    Timeout(Duration),

    #[error("download interrupted by cancel request")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote generation service.
#[async_trait]
pub trait RemoteOperationClient: Send + Sync {
    /// Open an execution context and attach credentials.
    async fn open_session(&self, kind: TaskKind) -> Result<Credential, RemoteError>;

    /// Start generating one item.
    async fn begin(
        &self,
        kind: TaskKind,
        input: &WorkInput,
        credential: &Credential,
    ) -> Result<OperationHandle, RemoteError>;

    /// Check the state of an operation once.
    async fn poll(
        &self,
        handle: &OperationHandle,
        credential: &Credential,
    ) -> Result<PollStatus, RemoteError>;

    /// Start the enhance (upscale) pass for a finished generation.
    async fn begin_enhance(
        &self,
        source: &OperationHandle,
        credential: &Credential,
    ) -> Result<OperationHandle, RemoteError>;
}

/// Stores a finished artifact locally.
#[async_trait]
pub trait ArtifactDownloader: Send + Sync {
    /// Fetch `locator` into `dest`. Returns the number of bytes written.
    async fn fetch(&self, locator: &ArtifactLocator, dest: &Path) -> Result<u64, DownloadError>;
}

/// Outcome of a submission policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Decides whether a team may submit on a given day.
#[async_trait]
pub trait SchedulingPolicy: Send + Sync {
    async fn is_submission_allowed(&self, team: &str, day: NaiveDate) -> Decision;
}

/// Policy that accepts every submission.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl SchedulingPolicy for AllowAll {
    async fn is_submission_allowed(&self, _team: &str, _day: NaiveDate) -> Decision {
        Decision::allow("unrestricted")
    }
}

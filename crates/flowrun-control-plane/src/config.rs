//! Control plane configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Control plane configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub http_bind_addr: String,

    /// Directory finished artifacts are downloaded into.
    pub artifact_dir: PathBuf,

    /// JSON file holding per-owner task history. In-memory when unset.
    pub history_path: Option<PathBuf>,

    /// Base URL of the remote generation service.
    pub remote_base_url: String,

    /// JSON file with the credential material (cookie list) for the remote.
    pub credentials_path: Option<PathBuf>,

    /// Job runner pacing and timeouts.
    pub runner: RunnerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind_addr: "0.0.0.0:8080".to_string(),
            artifact_dir: PathBuf::from("storage/generated"),
            history_path: None,
            remote_base_url: "http://127.0.0.1:9090".to_string(),
            credentials_path: None,
            runner: RunnerConfig::default(),
        }
    }
}

/// Timings used by every job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Delay between two status polls of one remote operation.
    pub poll_interval: Duration,

    /// Wall-clock limit for a generation operation to finish.
    pub poll_timeout: Duration,

    /// Wall-clock limit for an enhance (upscale) operation to finish.
    pub enhance_timeout: Duration,

    /// Limit for one request that starts an operation.
    pub request_timeout: Duration,

    /// Limit for storing one artifact.
    pub download_timeout: Duration,

    /// Pause between two items of the same task.
    pub cooldown: Duration,

    /// Minimum gap between "still waiting" lines in the task log.
    pub progress_log_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(300),
            enhance_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(120),
            download_timeout: Duration::from_secs(300),
            cooldown: Duration::from_secs(30),
            progress_log_interval: Duration::from_secs(30),
        }
    }
}

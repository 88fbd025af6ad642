//! FlowRun Control Plane Server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flowrun_control_plane::history::{HistorySink, InMemoryHistory, JsonFileHistory};
use flowrun_control_plane::http::create_router;
use flowrun_control_plane::remote::{AllowAll, HttpArtifactDownloader, HttpRemoteClient};
use flowrun_control_plane::{AppState, Collaborators, Config, Orchestrator};

/// FlowRun control plane: accepts generation batches and runs them against
/// the remote service.
#[derive(Parser, Debug)]
#[command(name = "flowrun-control-plane")]
#[command(about = "FlowRun control plane server", long_about = None)]
struct Args {
    /// HTTP server address
    #[arg(long, env = "FLOWRUN_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: String,

    /// Directory finished artifacts are written to
    #[arg(long, env = "FLOWRUN_ARTIFACT_DIR", default_value = "storage/generated")]
    artifact_dir: PathBuf,

    /// JSON file for task history (kept in memory when omitted)
    #[arg(long, env = "FLOWRUN_HISTORY_FILE")]
    history_file: Option<PathBuf>,

    /// Base URL of the remote generation service
    #[arg(long, env = "FLOWRUN_REMOTE_URL", default_value = "http://127.0.0.1:9090")]
    remote_url: String,

    /// Cookie file attached when opening remote sessions
    #[arg(long, env = "FLOWRUN_CREDENTIALS_FILE")]
    credentials_file: Option<PathBuf>,

    /// Seconds between status polls
    #[arg(long, env = "FLOWRUN_POLL_INTERVAL_SECS", default_value = "5")]
    poll_interval_secs: u64,

    /// Seconds to wait for one generation before giving up
    #[arg(long, env = "FLOWRUN_POLL_TIMEOUT_SECS", default_value = "300")]
    poll_timeout_secs: u64,

    /// Seconds to wait for one upscale before falling back
    #[arg(long, env = "FLOWRUN_ENHANCE_TIMEOUT_SECS", default_value = "300")]
    enhance_timeout_secs: u64,

    /// Seconds before a request that starts an operation gives up
    #[arg(long, env = "FLOWRUN_REQUEST_TIMEOUT_SECS", default_value = "120")]
    request_timeout_secs: u64,

    /// Seconds before an artifact download gives up
    #[arg(long, env = "FLOWRUN_DOWNLOAD_TIMEOUT_SECS", default_value = "300")]
    download_timeout_secs: u64,

    /// Seconds to pause between items
    #[arg(long, env = "FLOWRUN_COOLDOWN_SECS", default_value = "30")]
    cooldown_secs: u64,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config {
            http_bind_addr: self.http_addr,
            artifact_dir: self.artifact_dir,
            history_path: self.history_file,
            remote_base_url: self.remote_url,
            credentials_path: self.credentials_file,
            ..Config::default()
        };
        config.runner.poll_interval = Duration::from_secs(self.poll_interval_secs);
        config.runner.poll_timeout = Duration::from_secs(self.poll_timeout_secs);
        config.runner.enhance_timeout = Duration::from_secs(self.enhance_timeout_secs);
        config.runner.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config.runner.download_timeout = Duration::from_secs(self.download_timeout_secs);
        config.runner.cooldown = Duration::from_secs(self.cooldown_secs);
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let http_addr: SocketAddr = config.http_bind_addr.parse()?;

    let history: Arc<dyn HistorySink> = match &config.history_path {
        Some(path) => {
            info!(path = %path.display(), "Using file-backed history");
            Arc::new(JsonFileHistory::open(path).await?)
        }
        None => Arc::new(InMemoryHistory::new()),
    };

    let mut remote =
        HttpRemoteClient::new(&config.remote_base_url, config.runner.request_timeout)?;
    if let Some(path) = &config.credentials_path {
        remote = remote.with_credentials_file(path);
    }

    let state = AppState::new(
        Collaborators {
            remote: Arc::new(remote),
            downloader: Arc::new(HttpArtifactDownloader::new(config.runner.download_timeout)?),
            history,
            policy: Arc::new(AllowAll),
        },
        config.runner,
        config.artifact_dir.clone(),
    );
    let router = create_router(Orchestrator::new(state));

    info!(
        http_addr = %http_addr,
        remote = %config.remote_base_url,
        artifact_dir = %config.artifact_dir.display(),
        "Starting FlowRun control plane"
    );

    let listener = TcpListener::bind(http_addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

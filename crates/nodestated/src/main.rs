// # nodestated - SR-IOV Node State Daemon
//
// Thin integration layer: all status logic lives in nodestate-core.
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Wiring the sysfs device source, metadata source and API server store
// 4. Running the status writer (loop or single bootstrap pass)
// 5. Translating process signals into writer inputs
//
// ## Configuration
//
// ### Node
// - `NODESTATE_NODE_NAME`: Node state object name (required)
// - `NODESTATE_PLATFORM`: `baremetal` (default) or `openstack`
// - `NODESTATE_SYSFS_ROOT`: Sysfs mount point (default `/sys`)
//
// ### API Server
// - `NODESTATE_API_URL`: API server URL (default: in-cluster service address)
// - `NODESTATE_NAMESPACE`: Namespace of node state objects
// - `NODESTATE_API_TOKEN` / `NODESTATE_API_TOKEN_FILE`: Bearer token
// - `NODESTATE_API_CA_FILE`: Extra CA certificate (PEM)
//
// ### OpenStack
// - `NODESTATE_METADATA_URL`: Metadata service URL
// - `NODESTATE_CONFIG_DRIVE_DIR`: Config drive mount point
//
// ### Writer
// - `NODESTATE_CHECKPOINT_DIR`: Directory of the bootstrap checkpoint
// - `NODESTATE_RUN_ONCE`: `true` for a single poll/push/checkpoint pass
// - `NODESTATE_POLL_INTERVAL_SECS`: Passive refresh period
// - `NODESTATE_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Signals
//
// - SIGTERM, SIGINT: stop the writer
// - SIGHUP: refresh now with an empty sync message
//
// ## Example
//
// ```bash
// export NODESTATE_NODE_NAME=worker-0
// export NODESTATE_API_URL=https://api.cluster.local:6443
// export NODESTATE_API_TOKEN_FILE=/var/run/secrets/kubernetes.io/serviceaccount/token
//
// nodestated
// ```

use anyhow::{Context, Result};
use nodestate_core::traits::{PlatformKind, SyncMessage};
use nodestate_core::{StatusWriter, WriterConfig, WriterEvent};
use nodestate_device_sysfs::{DEFAULT_SYSFS_ROOT, SysfsDeviceSource};
use nodestate_metadata_openstack::{
    DEFAULT_CONFIG_DRIVE_DIR, DEFAULT_METADATA_URL, OpenStackMetadataSource,
};
use nodestate_remote_http::{DEFAULT_NAMESPACE, HttpRemoteStore};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
#[cfg(unix)]
use tokio_stream::{StreamExt, wrappers::SignalStream};

/// Service account credentials mounted into every pod
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Slack on top of the worst-case push when waiting for the writer to stop
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum NodestateExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<NodestateExitCode> for ExitCode {
    fn from(code: NodestateExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    node_name: String,
    namespace: String,
    api_url: Option<String>,
    api_token: Option<String>,
    api_token_file: Option<PathBuf>,
    api_ca_file: Option<PathBuf>,
    platform: PlatformKind,
    checkpoint_dir: Option<PathBuf>,
    run_once: bool,
    poll_interval_secs: Option<u64>,
    sysfs_root: PathBuf,
    metadata_url: String,
    config_drive_dir: PathBuf,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration through a variable lookup
    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let platform = match var("NODESTATE_PLATFORM") {
            Some(value) => value
                .parse::<PlatformKind>()
                .map_err(|e| anyhow::anyhow!("NODESTATE_PLATFORM: {}", e))?,
            None => PlatformKind::BareMetal,
        };

        let poll_interval_secs = var("NODESTATE_POLL_INTERVAL_SECS")
            .map(|s| {
                s.parse::<u64>()
                    .with_context(|| format!("NODESTATE_POLL_INTERVAL_SECS is not a number: {}", s))
            })
            .transpose()?;

        let run_once = match var("NODESTATE_RUN_ONCE").as_deref().map(str::to_lowercase) {
            None => false,
            Some(value) => match value.as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => anyhow::bail!("NODESTATE_RUN_ONCE must be true or false. Got: {}", other),
            },
        };

        // In-cluster defaults
        let api_url = var("NODESTATE_API_URL").or_else(|| {
            let host = var("KUBERNETES_SERVICE_HOST")?;
            let port = var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|| "443".to_string());
            Some(format!("https://{}:{}", host, port))
        });
        let service_account = PathBuf::from(SERVICE_ACCOUNT_DIR);
        let api_token_file = var("NODESTATE_API_TOKEN_FILE").map(PathBuf::from).or_else(|| {
            let path = service_account.join("token");
            path.exists().then_some(path)
        });
        let api_ca_file = var("NODESTATE_API_CA_FILE").map(PathBuf::from).or_else(|| {
            let path = service_account.join("ca.crt");
            path.exists().then_some(path)
        });

        Ok(Self {
            node_name: var("NODESTATE_NODE_NAME").unwrap_or_default(),
            namespace: var("NODESTATE_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            api_url,
            api_token: var("NODESTATE_API_TOKEN"),
            api_token_file,
            api_ca_file,
            platform,
            checkpoint_dir: var("NODESTATE_CHECKPOINT_DIR").map(PathBuf::from),
            run_once,
            poll_interval_secs,
            sysfs_root: var("NODESTATE_SYSFS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSFS_ROOT)),
            metadata_url: var("NODESTATE_METADATA_URL")
                .unwrap_or_else(|| DEFAULT_METADATA_URL.to_string()),
            config_drive_dir: var("NODESTATE_CONFIG_DRIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DRIVE_DIR)),
            log_level: var("NODESTATE_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            anyhow::bail!(
                "NODESTATE_NODE_NAME is required. \
                Set it via: export NODESTATE_NODE_NAME=$(hostname)"
            );
        }

        match self.api_url.as_deref() {
            None | Some("") => anyhow::bail!(
                "NODESTATE_API_URL is required outside a cluster. \
                Set it via: export NODESTATE_API_URL=https://api.cluster.local:6443"
            ),
            Some(url) if !url.starts_with("https://") && !url.starts_with("http://") => {
                anyhow::bail!("NODESTATE_API_URL must use HTTP or HTTPS scheme. Got: {}", url)
            }
            Some(url) if url.starts_with("http://") => {
                eprintln!(
                    "WARNING: NODESTATE_API_URL uses HTTP (not HTTPS). \
                    The bearer token will be sent in clear text."
                );
            }
            Some(_) => {}
        }

        if self.api_token.is_some() && self.api_token_file.is_some() {
            eprintln!(
                "WARNING: both NODESTATE_API_TOKEN and NODESTATE_API_TOKEN_FILE are set; \
                using NODESTATE_API_TOKEN"
            );
        }

        if let Some(interval) = self.poll_interval_secs
            && !(1..=3600).contains(&interval)
        {
            anyhow::bail!(
                "NODESTATE_POLL_INTERVAL_SECS must be between 1 and 3600 seconds. Got: {}",
                interval
            );
        }

        if self.platform.is_virtual() && self.metadata_url.is_empty() {
            anyhow::bail!("NODESTATE_METADATA_URL cannot be empty when NODESTATE_PLATFORM=openstack");
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "NODESTATE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.writer_config().validate()?;

        Ok(())
    }

    /// Writer configuration derived from the environment
    fn writer_config(&self) -> WriterConfig {
        let mut config = WriterConfig::new(self.node_name.trim()).with_platform(self.platform);
        if let Some(dir) = &self.checkpoint_dir {
            config = config.with_checkpoint_dir(dir);
        }
        if let Some(interval) = self.poll_interval_secs {
            config.poll_interval_secs = interval;
        }
        config.run_once = self.run_once;
        config
    }

    /// How long the writer gets to finish its current iteration after stop
    ///
    /// Covers one full fetch budget per conflict attempt.
    fn shutdown_timeout(&self) -> Duration {
        let writer = self.writer_config();
        let attempts = u32::try_from(writer.conflict_backoff.steps).unwrap_or(u32::MAX);
        writer
            .fetch
            .timeout()
            .checked_mul(attempts)
            .unwrap_or(Duration::MAX)
            .saturating_add(SHUTDOWN_GRACE)
    }

    /// Bearer token, from the variable or the token file
    fn token(&self) -> Result<Option<String>> {
        if let Some(token) = &self.api_token {
            return Ok(Some(token.clone()));
        }
        match &self.api_token_file {
            Some(path) => std::fs::read_to_string(path)
                .map(Some)
                .with_context(|| format!("Failed to read API token file {}", path.display())),
            None => Ok(None),
        }
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return NodestateExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return NodestateExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return NodestateExitCode::ConfigError.into();
    }

    info!("Starting nodestated for node {}", config.node_name);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return NodestateExitCode::RuntimeError.into();
        }
    };

    let writer = match build_writer(&config) {
        Ok(writer) => writer,
        Err(e) => {
            error!("Startup error: {:#}", e);
            return NodestateExitCode::ConfigError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config, writer).await {
            error!("Daemon error: {:#}", e);
            NodestateExitCode::RuntimeError
        } else {
            NodestateExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Wire the writer's collaborators
fn build_writer(config: &Config) -> Result<(StatusWriter, mpsc::Receiver<WriterEvent>)> {
    let api_url = config.api_url.clone().unwrap_or_default();
    let mut remote = HttpRemoteStore::new(api_url, config.namespace.clone())?;
    if let Some(token) = config.token()? {
        remote = remote.with_token(token);
    }
    if let Some(path) = &config.api_ca_file {
        let pem = std::fs::read(path)
            .with_context(|| format!("Failed to read CA file {}", path.display()))?;
        remote = remote.with_ca_certificate(&pem)?;
    }
    let remote = Arc::new(remote);

    let devices = SysfsDeviceSource::new(&config.sysfs_root);
    info!("Discovering devices under {}", devices.root().display());

    let (writer, events) = StatusWriter::new(
        Box::new(devices),
        remote.clone(),
        remote,
        config.writer_config(),
    )?;

    let writer = if config.platform.is_virtual() {
        info!(
            "Virtual platform: metadata from {} or {}",
            config.config_drive_dir.display(),
            config.metadata_url
        );
        writer.with_metadata_source(Box::new(OpenStackMetadataSource::new(
            &config.config_drive_dir,
            &config.metadata_url,
        )))
    } else {
        writer
    };

    Ok((writer, events))
}

/// Run the daemon
async fn run_daemon(
    config: Config,
    (mut writer, events): (StatusWriter, mpsc::Receiver<WriterEvent>),
) -> Result<()> {
    let event_logger = tokio::spawn(log_events(events));

    if writer.is_run_once() {
        let initial = writer.run_once().await?;
        info!(
            "Initial node state captured ({:?}) in {}: {} interface(s)",
            initial.origin,
            writer.checkpoint().path().display(),
            initial.status.interfaces.len()
        );
        drop(writer);
        let _ = event_logger.await;
        return Ok(());
    }

    let (stop_tx, stop_rx) = oneshot::channel();
    let (refresh_tx, refresh_rx) = mpsc::channel::<SyncMessage>(16);
    let (sync_complete_tx, mut sync_complete_rx) = mpsc::channel(16);

    let shutdown_timeout = config.shutdown_timeout();
    let mut writer_handle =
        tokio::spawn(async move { writer.run(stop_rx, refresh_rx, sync_complete_tx).await });

    tokio::spawn(async move {
        while sync_complete_rx.recv().await.is_some() {
            info!("Node state sync complete");
        }
    });

    let signal = wait_for_signals(refresh_tx).await?;
    info!("Received shutdown signal: {}", signal);

    let _ = stop_tx.send(());

    match tokio::time::timeout(shutdown_timeout, &mut writer_handle).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => anyhow::bail!("Writer task failed: {}", e),
        Err(_) => {
            warn!(
                "Writer still busy after {:?}, abandoning in-flight update",
                shutdown_timeout
            );
            writer_handle.abort();
        }
    }

    let _ = event_logger.await;
    info!("Shutting down daemon");
    Ok(())
}

/// Log writer events until the writer is dropped
async fn log_events(mut events: mpsc::Receiver<WriterEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WriterEvent::StatusPushed {
                sync_status,
                interfaces,
                resource_version,
                observed_at,
            } => info!(
                "Pushed {} interface(s), syncStatus={:?}, version {} at {}",
                interfaces,
                sync_status.as_str(),
                resource_version,
                observed_at.to_rfc3339()
            ),
            WriterEvent::PushFailed { error } => warn!("Status push failed: {}", error),
            WriterEvent::PollFailed { error } => warn!("Device poll failed: {}", error),
            other => debug!("Writer event: {:?}", other),
        }
    }
}

/// Forward SIGHUP as refreshes until SIGTERM or SIGINT
///
/// # Returns
///
/// Returns the name of the stop signal received.
#[cfg(unix)]
async fn wait_for_signals(refresh_tx: mpsc::Sender<SyncMessage>) -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
    let mut sighup = SignalStream::new(
        signal(SignalKind::hangup())
            .map_err(|e| anyhow::anyhow!("Failed to setup SIGHUP handler: {}", e))?,
    );

    loop {
        tokio::select! {
            _ = sigterm.recv() => return Ok("SIGTERM"),
            _ = sigint.recv() => return Ok("SIGINT"),
            Some(()) = sighup.next() => {
                info!("SIGHUP received, requesting refresh");
                if refresh_tx.send(SyncMessage::default()).await.is_err() {
                    warn!("Writer no longer accepts refreshes");
                }
            }
        }
    }
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms; refreshes are timer-only.
#[cfg(not(unix))]
async fn wait_for_signals(_refresh_tx: mpsc::Sender<SyncMessage>) -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vzpod_container::DockerClient;
use vzpod_core::{ConfigMap, ConfigMapSource, MacVmClient, NodeConfig, TokenSource, VzEngine};
use vzpod_event::LogEventRecorder;
use vzpod_vz::{HostIpResolver, VmSubstrate};

#[derive(Debug, Parser)]
#[command(name = "vzpod-daemon")]
#[command(author, version, about = "macOS VM worker-node daemon", long_about = None)]
pub struct DaemonArgs {
    /// Node name registered with the control plane.
    #[arg(long, default_value = "vzpod-node")]
    pub node_name: String,

    /// Startup timeout in seconds.
    #[arg(long, default_value_t = 120)]
    pub startup_timeout: u64,

    /// Keep the node schedulable without removing the provider taint.
    #[arg(long)]
    pub disable_taint: bool,

    /// Log level filter (overridden by RUST_LOG).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Number of pod sync workers.
    #[arg(long, default_value_t = 10)]
    pub pod_sync_workers: usize,

    /// Full informer resync period in seconds.
    #[arg(long, default_value_t = 60)]
    pub full_resync_period: u64,

    /// Enable token-review webhook authentication.
    #[arg(long)]
    pub authentication_token_webhook: bool,

    /// Webhook authentication cache TTL in seconds.
    #[arg(long, default_value_t = 300)]
    pub authentication_token_webhook_cache_ttl: u64,

    /// Webhook authorization cache TTL for authorized requests, seconds.
    #[arg(long, default_value_t = 300)]
    pub authorization_webhook_cache_authorized_ttl: u64,

    /// Webhook authorization cache TTL for unauthorized requests, seconds.
    #[arg(long, default_value_t = 30)]
    pub authorization_webhook_cache_unauthorized_ttl: u64,

    /// Trace sample rate in percent.
    #[arg(long, default_value_t = 0)]
    pub trace_sample_rate: u8,

    /// On-disk cache directory for images and pod mounts.
    #[arg(long)]
    pub cache_path: Option<std::path::PathBuf>,

    /// Run against the in-process substrate instead of real VMs.
    ///
    /// The native virtualization substrate ships with the platform
    /// integration; this flag lets the daemon run end-to-end without it.
    #[arg(long)]
    pub simulate: bool,
}

/// Credential collaborators for a daemon running without a control-plane
/// client: pods relying on projected credentials are rejected with a
/// clear error, everything else works.
struct DisconnectedCredentials;

#[async_trait]
impl TokenSource for DisconnectedCredentials {
    async fn request_token(
        &self,
        _namespace: &str,
        _service_account: &str,
        _audience: Option<&str>,
        _expiration_seconds: Option<i64>,
    ) -> vzpod_core::Result<String> {
        Err(vzpod_error::CommonError::unavailable("token source not configured").into())
    }
}

#[async_trait]
impl ConfigMapSource for DisconnectedCredentials {
    async fn get_config_map(&self, _namespace: &str, name: &str) -> vzpod_core::Result<ConfigMap> {
        Err(vzpod_error::CommonError::unavailable(format!(
            "config map source not configured (requested {name})"
        ))
        .into())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(args).await
}

async fn run(args: DaemonArgs) -> Result<()> {
    info!("Starting vzpod daemon...");

    let mut config = NodeConfig {
        node_name: args.node_name.clone(),
        startup_timeout: Duration::from_secs(args.startup_timeout),
        disable_taint: args.disable_taint,
        pod_sync_workers: args.pod_sync_workers,
        full_resync_period: Duration::from_secs(args.full_resync_period),
        ..NodeConfig::default()
    }
    .with_env();
    if let Some(cache_path) = args.cache_path {
        config.cache_path = cache_path;
    }
    std::fs::create_dir_all(&config.cache_path).context("Failed to create cache directory")?;

    if config.ssh_credentials().is_none() {
        warn!("VZ_SSH_USER/VZ_SSH_PASSWORD not set; guest exec will be unavailable");
    }

    let substrate = platform_substrate(args.simulate)?;
    let recorder = Arc::new(LogEventRecorder);

    let vm_client = MacVmClient::new(
        substrate,
        Arc::new(HostIpResolver),
        config.network_interface.clone(),
        config.cache_path.clone(),
        config.ssh_credentials(),
    );

    let container_client = match connect_docker(config.docker_host.as_deref()).await {
        Ok(docker) => match DockerClient::new(docker).await {
            Ok(client) => Some(client),
            Err(err) => {
                warn!(error = %err, "Failed to create container client");
                None
            }
        },
        Err(err) => {
            warn!(error = %err, "Failed to connect to container runtime");
            None
        }
    };

    let engine = Arc::new(VzEngine::new(
        vm_client,
        container_client,
        recorder,
        Arc::new(DisconnectedCredentials),
        Arc::new(DisconnectedCredentials),
        config.cache_path.clone(),
        config.internal_ip.clone(),
    ));

    info!(
        node = config.node_name,
        cache = %config.cache_path.display(),
        interface = config.network_interface,
        "Pod engine initialized"
    );
    // The control-plane harness drives the engine from here; keep it
    // alive until signalled.
    let _engine = engine;

    shutdown_signal().await;
    info!("Shutdown signal received, stopping");
    Ok(())
}

fn platform_substrate(simulate: bool) -> Result<Arc<dyn VmSubstrate>> {
    if simulate {
        info!("Using the in-process simulated substrate");
        return Ok(Arc::new(vzpod_vz::mock::MockSubstrate::new()));
    }
    anyhow::bail!(
        "the native virtualization substrate is provided by the platform integration; \
         pass --simulate to run without it"
    )
}

async fn connect_docker(docker_host: Option<&str>) -> Result<Docker> {
    let docker = match docker_host {
        Some(host) => {
            let socket = host.trim_start_matches("unix://");
            Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)?
        }
        None => Docker::connect_with_socket_defaults()?,
    };

    let version = docker.version().await.context("Failed to ping container runtime")?;
    info!(
        version = version.version.unwrap_or_default(),
        "Connected to container runtime"
    );
    Ok(docker)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

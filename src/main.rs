use glinr_monitor::api::{ApiServer, PKG_NAME, VERSION};
use glinr_monitor::config::Config;
use glinr_monitor::docker::DockerEventSource;
use glinr_monitor::events::EventMonitor;
use glinr_monitor::identity::HashIdentityResolver;
use glinr_monitor::state::{AtomicGauge, StateCache};
use glinr_monitor::subscribers::SubscriberRegistry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("glinr_monitor=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("glinr-monitor.toml"));

    let config = Config::load_or_default(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(name = PKG_NAME, version = VERSION, path = %config_path.display(), "Starting container monitor");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        container_prefix = %config.docker.container_prefix,
        reconcile_on_start = config.docker.reconcile_on_start,
        queue_capacity = config.subscribers.queue_capacity,
        send_timeout_secs = config.subscribers.send_timeout_secs,
        "Configuration loaded"
    );

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    // The one fatal setup error: no daemon, no monitor
    let source = DockerEventSource::connect(config.docker.host.as_deref()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let subscribers = SubscriberRegistry::new();
    let gauge = AtomicGauge::new();
    let cache = StateCache::new(Arc::clone(&subscribers), gauge.clone());
    let resolver = Arc::new(HashIdentityResolver::with_prefix(
        config.docker.container_prefix.clone(),
    ));

    let monitor = EventMonitor::new(
        Arc::new(source),
        Arc::clone(&cache),
        resolver,
        config.docker.monitor_options(),
    );
    let monitor_handle = monitor.start(shutdown_rx.clone()).await?;

    let api_server = ApiServer::new(
        bind_addr,
        Arc::clone(&cache),
        Arc::clone(&subscribers),
        gauge,
        config.subscribers.session_options(),
        shutdown_rx.clone(),
    );
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    let _ = shutdown_tx.send(true);

    // Wait for the monitor and server to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = monitor_handle.await;
        let _ = api_handle.await;
    })
    .await;

    info!(tracked_services = cache.len(), "Shutdown complete");
    Ok(())
}

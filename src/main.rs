use devgate::config::Config;
use devgate::proxy::ProxyServer;
use devgate::supervisor::BackendSupervisor;
use devgate::{PKG_NAME, VERSION};
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
                .add_directive("devgate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration; with no explicit path and no config.toml the
    // defaults are complete enough to run as-is
    let explicit_path = std::env::args().nth(1).map(PathBuf::from);
    let config_path = explicit_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if explicit_path.is_none() && !config_path.exists() {
        info!("No config.toml found, using defaults");
        Config::default()
    } else {
        let config = Config::load(&config_path).map_err(|e| {
            error!(path = %config_path.display(), error = %e, "Failed to load configuration");
            e
        })?;
        info!(path = %config_path.display(), "Configuration loaded");
        config
    };

    print_startup_banner(&config);

    let config = Arc::new(config);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn and wait for the backend before accepting any traffic. A backend
    // that never becomes healthy aborts the whole run.
    let mut supervisor = if config.backend.manage {
        let mut supervisor = BackendSupervisor::new(config.backend.clone());
        if let Err(e) = supervisor.start().await {
            if let Some(output) = e.diagnostics() {
                error!(%output, "Captured backend output");
            }
            error!(error = %e, "Backend failed to start");
            anyhow::bail!("backend failed to start: {}", e);
        }
        Some(supervisor)
    } else {
        info!(
            backend = %config.backend.base_url(),
            "Backend supervision disabled, assuming it is already running"
        );
        None
    };

    // Bind before spawning the accept loop so an unusable port fails the run
    let server = ProxyServer::bind(Arc::clone(&config), shutdown_rx.clone()).await?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Proxy server error");
        }
    });

    wait_for_shutdown_signal().await;

    // Signal shutdown: the accept loop stops, in-flight connections drain
    // best-effort on their own tasks
    let _ = shutdown_tx.send(true);

    if let Some(ref mut supervisor) = supervisor {
        info!("Stopping backend...");
        supervisor.stop().await;
    }

    // Wait for the server task to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

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
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting proxy server");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        api_prefix = %config.server.api_prefix,
        static_root = %config.server.static_root,
        proxy_timeout_secs = config.server.proxy_timeout_secs,
        "Server configuration"
    );
    info!(
        host = %config.backend.host,
        port = config.backend.port,
        manage = config.backend.manage,
        "Backend target"
    );
    if config.backend.manage {
        info!(
            command = ?config.backend.command,
            working_dir = ?config.backend.working_dir,
            health_path = %config.backend.health_path,
            health_max_attempts = config.backend.health_max_attempts,
            health_interval_ms = config.backend.health_interval_ms,
            settle_delay_ms = config.backend.settle_delay_ms,
            shutdown_grace_secs = config.backend.shutdown_grace_secs,
            "Backend supervision settings"
        );
    }
}

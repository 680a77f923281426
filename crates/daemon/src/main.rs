//! Outpost Agent - Main Entry Point
//! Runs scheduled monitoring activities and delivers their results to the server.

mod config;
mod logging;

use anyhow::{Context, Result};
use config::DaemonConfig;
use std::sync::Arc;
use tracing::{error, info, warn};

use outpost_core::application::{
    shutdown_channel, Agent, AgentDeps, ConnectivitySignal, JobClock, RefreshHandle,
    ShutdownSender,
};
use outpost_core::port::{
    ErrorReporter, PluginRegistry, SystemTimeProvider, TimeProvider, TracingErrorReporter,
};
use outpost_infra_http::HttpTransport;
use outpost_infra_sqlite::{database_url, SqliteOfflineStore};
use outpost_infra_system::{FileRegistry, ShellExecutor, ShellExecutorConfig, SystemMetricsPlugin};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging
    let _log_guard = logging::init();
    info!("Outpost agent v{} starting...", VERSION);

    // 2. Configuration
    let config = DaemonConfig::from_env().context("Invalid configuration")?;
    info!(
        db_path = %config.db_path.display(),
        temp_dir = %config.agent.temp_dir.display(),
        server = %config.server_url,
        "Configuration loaded"
    );

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }

    // 3. Adapters (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let clock = Arc::new(JobClock::new(Arc::clone(&time_provider)));
    let reporter: Arc<dyn ErrorReporter> = Arc::new(TracingErrorReporter);

    let offline_store = Arc::new(
        SqliteOfflineStore::open(&database_url(&config.db_path))
            .await
            .context("Offline queue initialization failed")?,
    );
    let registry = Arc::new(
        FileRegistry::open(&config.activities_path)
            .await
            .context("Registry load failed")?,
    );
    let command_executor = Arc::new(
        ShellExecutor::new(
            ShellExecutorConfig::from_agent_config(&config.agent),
            Arc::clone(&clock),
            Arc::clone(&reporter),
        )
        .context("Command executor initialization failed")?,
    );
    let transport = Arc::new(
        HttpTransport::new(config.server_url.clone(), config.http_timeout)
            .context("Transport initialization failed")?,
    );

    let mut plugins = PluginRegistry::new();
    plugins.register(Arc::new(SystemMetricsPlugin::new()));

    // 4. Agent
    let (shutdown_tx, shutdown) = shutdown_channel();
    let deps = AgentDeps {
        registry: registry.clone(),
        transport,
        offline_store,
        command_executor,
        plugins,
        clock,
        time_provider,
        reporter,
    };
    let agent = Agent::new(config.agent, deps, ConnectivitySignal::default(), shutdown);

    // 5. Signals: SIGHUP reloads the registry, SIGTERM / Ctrl+C shut down
    tokio::spawn(handle_signals(registry, agent.refresh_handle(), shutdown_tx));

    info!("Agent ready");
    agent.run().await?;

    info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn handle_signals(
    registry: Arc<FileRegistry>,
    refresh: RefreshHandle,
    shutdown: ShutdownSender,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let signals = (signal(SignalKind::hangup()), signal(SignalKind::terminate()));
    let (mut hangup, mut terminate) = match signals {
        (Ok(hangup), Ok(terminate)) => (hangup, terminate),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Cannot install signal handlers, waiting for Ctrl+C only");
            wait_ctrl_c().await;
            shutdown.shutdown();
            return;
        }
    };

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading registry");
                match registry.reload().await {
                    Ok(_) => refresh.refresh(),
                    Err(e) => warn!(
                        path = %registry.path().display(),
                        error = %e,
                        "Registry reload failed"
                    ),
                }
            }
            _ = terminate.recv() => {
                info!("SIGTERM received. Exiting gracefully...");
                break;
            }
            _ = wait_ctrl_c() => {
                info!("Ctrl+C received. Exiting gracefully...");
                break;
            }
        }
    }
    shutdown.shutdown();
}

#[cfg(not(unix))]
async fn handle_signals(
    _registry: Arc<FileRegistry>,
    _refresh: RefreshHandle,
    shutdown: ShutdownSender,
) {
    wait_ctrl_c().await;
    info!("Ctrl+C received. Exiting gracefully...");
    shutdown.shutdown();
}

async fn wait_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

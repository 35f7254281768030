//! drivesync: bi-directional cloud-folder sync daemon

use anyhow::Context;
use clap::Parser;
use drivesync::engine::SyncEngine;
use drivesync::remote::{GraphClient, RemoteClient};
use drivesync::server::{self, AppState};
use drivesync::state::StateStore;
use drivesync::{Config, HealthMetrics, HistoryLog, LogHub, LogHubLayer, SyncManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging: env filter, stderr output, plus the hub feeding the SSE
    // log stream.
    let loghub = Arc::new(LogHub::new());
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .with(LogHubLayer::new(loghub.clone()))
        .init();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::config_path().context("cannot resolve config directory")?,
    };

    let health = Arc::new(HealthMetrics::new());
    let history = Arc::new(HistoryLog::new(
        Config::history_path().context("cannot resolve config directory")?,
    ));

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => {
            let manager = Arc::new(SyncManager::new(config_path, health, history));
            if let Err(e) = manager.start().await {
                error!("Startup failed: {}", e);
                std::process::exit(1);
            }

            let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
            if !cli.no_gui {
                info!("Dashboard available at http://{addr}/api/status");
            }

            let state = AppState {
                manager: manager.clone(),
                loghub,
            };
            tokio::select! {
                result = server::serve(state, addr) => {
                    result.context("control surface failed")?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping...");
                }
            }

            let _ = manager.stop().await;
            info!("drivesync stopped.");
            Ok(())
        }
        Commands::Sync => {
            let config = Config::load(&config_path)?;
            if config.share_link.is_empty() {
                error!("No share link configured");
                std::process::exit(1);
            }

            let remote: Arc<dyn RemoteClient> = Arc::new(
                GraphClient::builder()
                    .share_link(&config.share_link)
                    .health(health.clone())
                    .build()?,
            );
            if !remote.validate().await? {
                error!("Could not access the shared folder. Check your share link.");
                std::process::exit(1);
            }

            tokio::fs::create_dir_all(&config.local_folder).await?;
            let store = Arc::new(StateStore::load(Config::state_db_path()?));
            let engine = SyncEngine::new(remote, &config, store, history);

            let stats = engine.full_sync().await?;
            engine.init_delta_link().await;
            println!("Synced {} file(s), {} error(s)", stats.synced, stats.errors);
            Ok(())
        }
        Commands::Status => {
            let manager = SyncManager::new(config_path, health, history);
            let status = manager.status();
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use live_im_proxy::channels::{ChannelManager, ManagerSettings};
use live_im_proxy::cli::{Cli, LogFormat};
use live_im_proxy::credentials::CredentialStore;
use live_im_proxy::oauth::DouyinOAuth;
use live_im_proxy::server::{ApiServer, AppState};
use live_im_proxy::{Config, Pipeline, RateLimiter};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap so its env fallbacks see the file too.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = Config::from_env().context("Invalid configuration")?;
    cli.apply(&mut config);
    config.log_summary();

    let limiter = Arc::new(RateLimiter::new(config.limiter.rate, config.limiter.burst));
    let pipeline = Arc::new(Pipeline::from_config(&config, limiter));
    let manager = Arc::new(ChannelManager::new(
        pipeline.clone(),
        pipeline.reply_router(),
        ManagerSettings::from_config(&config),
    ));
    let credentials = CredentialStore::new();
    let oauth = Arc::new(DouyinOAuth::new(
        config.oauth.clone(),
        config.platforms.douyin_api_base.clone(),
    ));

    for tag in &config.auto_start {
        if let Err(e) = manager.start_channel(tag).await {
            tracing::error!(channel = %tag, error = %e, "Failed to auto-start channel");
        }
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(manager.clone(), pipeline.clone(), credentials, oauth);
    let mut server = ApiServer::new(addr, state);
    server
        .start()
        .await
        .with_context(|| format!("Failed to start HTTP server on {}", addr))?;

    shutdown_signal().await;

    server.shutdown().await;
    let failures = manager.stop_all().await;
    pipeline.shutdown().await;

    tracing::info!(
        stats = ?pipeline.stats(),
        failed_channels = failures.len(),
        "Shutdown complete"
    );
    Ok(())
}

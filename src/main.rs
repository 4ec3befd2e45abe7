mod config;
mod download;
mod error;
mod fetch;
mod hls;
mod progress;
mod providers;
mod proxy;
mod resolver;
mod server;
mod session;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, info};

use crate::config::Config;
use crate::download::Remuxer;
use crate::fetch::Fetcher;
use crate::progress::ProgressStore;
use crate::providers::Extractors;
use crate::server::AppState;
use crate::session::SessionCache;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().filter_or("RUST_LOG", "info"))
        .format_timestamp_secs()
        .init();

    let config = Config::parse();
    let fetcher = Arc::new(Fetcher::new(config.user_agent.clone(), config.timeouts())?);

    let cache = Arc::new(SessionCache::new(config.session_ttl()));
    if let Some(ttl) = config.session_ttl() {
        info!("Resolved videos expire after {}s idle", ttl.as_secs());
        spawn_sweeper(cache.clone());
    }

    let progress = ProgressStore::open(config.progress_path())?;
    let remuxer = if config.no_remux {
        info!("Remuxing disabled, HLS downloads are served as MPEG-TS");
        None
    } else {
        Remuxer::detect()
    };

    let state = AppState::new(
        fetcher,
        Extractors::with_defaults(&config.origins()),
        cache,
        progress,
        remuxer,
        config.download_concurrency,
    );

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Listening on http://{}", config.bind);

    axum::serve(listener, server::router(state))
        .await
        .context("HTTP server failed")
}

fn spawn_sweeper(cache: Arc<SessionCache>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = cache.evict_expired();
            if evicted > 0 {
                info!("Evicted {evicted} idle videos, {} cached", cache.len());
            } else {
                debug!("{} videos cached", cache.len());
            }
        }
    });
}

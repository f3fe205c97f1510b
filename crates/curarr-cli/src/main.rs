// SPDX-License-Identifier: GPL-3.0-or-later
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::serve;
use curarr_api::{router, ApiState};
use curarr_application::{BulkController, Deps, FfprobeProber, LoggingNotifier};
use curarr_infrastructure::{
    http_client, init_database, SettingsReader, SqliteActorRepository, SqliteCacheFileStore,
    SqliteCandidateStore, SqliteJobStore, SqliteLibraryRepository, SqliteMovieRepository,
    SqliteProviderCacheStore, SqliteRefreshLogStore, SqliteSettingsStore,
};
use curarr_metadata::{FanartTvClient, TmdbClient};
use curarr_queue::{Scheduler, WorkerPool};
use curarr_realtime::BroadcastHub;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = curarr_config::load(None)?;
    let pool = init_database(&config).await?;

    let hub = Arc::new(BroadcastHub::new(256));
    let settings = SettingsReader::new(Arc::new(SqliteSettingsStore::new(pool.clone())));

    let tmdb = config.providers.tmdb.api_key.clone().map(|key| {
        Arc::new(TmdbClient::new_with_limits(
            key,
            config.providers.tmdb.max_concurrent_requests,
            config.providers.tmdb.base_url.clone(),
        ))
    });
    let fanart = config.providers.fanarttv.api_key.clone().map(|key| {
        Arc::new(FanartTvClient::new_with_limits(
            key,
            config.providers.fanarttv.client_key.clone(),
            config.providers.fanarttv.max_concurrent_requests,
            config.providers.fanarttv.base_url.clone(),
        ))
    });
    if tmdb.is_none() {
        info!(target: "cli", "no TMDB api key configured; provider fetches will degrade");
    }

    let deps = Arc::new(Deps {
        config: config.clone(),
        libraries: Arc::new(SqliteLibraryRepository::new(pool.clone())),
        movies: Arc::new(SqliteMovieRepository::new(pool.clone())),
        actors: Arc::new(SqliteActorRepository::new(pool.clone())),
        jobs: Arc::new(SqliteJobStore::new(pool.clone())),
        candidates: Arc::new(SqliteCandidateStore::new(pool.clone())),
        cache_files: Arc::new(SqliteCacheFileStore::new(pool.clone())),
        provider_cache: Arc::new(SqliteProviderCacheStore::new(pool.clone())),
        refresh_log: Arc::new(SqliteRefreshLogStore::new(pool.clone())),
        settings,
        tmdb,
        fanart,
        http: http_client(),
        hub: hub.clone(),
        bulk: Arc::new(BulkController::new()),
        prober: Arc::new(FfprobeProber),
        notifier: Arc::new(LoggingNotifier),
    });

    let mut workers = WorkerPool::new(deps.clone());
    workers.start();
    let mut scheduler = Scheduler::new(deps.clone());
    scheduler.start();

    let listener = TcpListener::bind(bind_addr(&config.http)).await?;
    let addr = listener.local_addr()?;
    info!(target: "cli", "listening on {}", addr);

    serve(
        listener,
        router(ApiState {
            deps: deps.clone(),
            hub,
        }),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    scheduler.stop();
    workers.shutdown().await;
    info!(target: "cli", "bye");
    Ok(())
}

fn init_tracing() {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn bind_addr(http: &curarr_config::HttpConfig) -> SocketAddr {
    let addr = format!("{}:{}", http.host, http.port);
    addr.parse().expect("valid listen address")
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let mut interrupt = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("install SIGINT handler");

    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("install SIGTERM handler");

    #[cfg(not(unix))]
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    tokio::select! {
        _ = interrupt.recv() => {},
        _ = terminate.recv() => {},
    }

    #[cfg(not(unix))]
    {
        interrupt.await.expect("ctrl_c handler");
    }

    info!(target: "cli", "shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addr_parsing() {
        let http = curarr_config::HttpConfig {
            host: "127.0.0.1".to_string(),
            port: 5160,
        };
        let addr = bind_addr(&http);
        assert_eq!(addr.port(), 5160);
        assert!(addr.is_ipv4());
    }

    #[test]
    fn test_bind_addr_ipv6() {
        let http = curarr_config::HttpConfig {
            host: "[::1]".to_string(),
            port: 8080,
        };
        let addr = bind_addr(&http);
        assert_eq!(addr.port(), 8080);
        assert!(addr.is_ipv6());
    }
}

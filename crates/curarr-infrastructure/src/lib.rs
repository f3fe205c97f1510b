// SPDX-License-Identifier: GPL-3.0-or-later
pub mod asset_store;
pub mod job_store;
pub mod repositories;
pub mod settings;
pub mod sqlite_adapters;

use anyhow::Result;
use curarr_config::AppConfig;
use reqwest::Client;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

pub use asset_store::{
    SqliteCacheFileStore, SqliteCandidateStore, SqliteProviderCacheStore, SqliteRefreshLogStore,
};
pub use job_store::SqliteJobStore;
pub use repositories::{
    ActorRepository, CacheFileStore, CandidateStore, JobStore, LibraryRepository,
    MovieRepository, ProviderCacheStore, RefreshLogStore, SettingsStore,
};
pub use settings::{SettingsReader, SqliteSettingsStore};
pub use sqlite_adapters::{SqliteActorRepository, SqliteLibraryRepository, SqliteMovieRepository};

pub fn http_client() -> Client {
    Client::builder()
        .pool_max_idle_per_host(8)
        .build()
        .expect("http client")
}

/// Open the SQLite pool and run migrations. The URL is normalized so relative
/// paths work on every platform and the file is created on first start.
pub async fn init_database(config: &AppConfig) -> Result<SqlitePool> {
    info!(target: "infrastructure", "initializing database");

    let db_url = normalize_sqlite_url(&config.database.url)?;
    if let Some(file) = db_url
        .strip_prefix("sqlite://")
        .filter(|rest| !rest.starts_with(":memory:"))
    {
        let file = file.trim_end_matches("?mode=rwc");
        if let Some(parent) = Path::new(file).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    info!(target: "infrastructure", db_url = %db_url, "connecting to database");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.pool_max_size)
        .connect(&db_url)
        .await?;

    info!(target: "infrastructure", "running migrations");
    sqlx::migrate!("../../migrations").run(&pool).await?;

    info!(target: "infrastructure", "database initialized successfully");
    Ok(pool)
}

fn normalize_sqlite_url(url: &str) -> Result<String> {
    if !url.starts_with("sqlite://") || url.starts_with("sqlite://:memory:") {
        return Ok(url.to_string());
    }

    let db_path = url.trim_start_matches("sqlite://");
    let path = Path::new(db_path);

    let absolute_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let path_str = absolute_path.to_string_lossy().replace('\\', "/");
    Ok(format!("sqlite://{}?mode=rwc", path_str))
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite://:memory:")
        .await
        .expect("in-memory pool");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

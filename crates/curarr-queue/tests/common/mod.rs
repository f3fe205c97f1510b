// SPDX-License-Identifier: GPL-3.0-or-later
//! Chain-test fixture: full dependency bundle over in-memory SQLite, TMDB
//! pointed at wiremock, no fanart client, synchronous job pump.

use curarr_application::{
    BulkController, Deps, LoggingNotifier, StreamProber, WorkflowResult,
};
use curarr_config::AppConfig;
use curarr_domain::{
    AutomationMode, Library, LibraryId, LibraryKind, MediaStream, NotifierKind,
};
use curarr_infrastructure::{
    SettingsReader, SqliteActorRepository, SqliteCacheFileStore, SqliteCandidateStore,
    SqliteJobStore, SqliteLibraryRepository, SqliteMovieRepository, SqliteProviderCacheStore,
    SqliteRefreshLogStore, SqliteSettingsStore,
};
use curarr_metadata::TmdbClient;
use curarr_queue::{dispatch, JobContext};
use curarr_realtime::InMemoryHub;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

pub struct NoopProber;

#[async_trait::async_trait]
impl StreamProber for NoopProber {
    async fn probe(&self, _path: &Path) -> WorkflowResult<Vec<MediaStream>> {
        Ok(Vec::new())
    }
}

pub struct ChainHarness {
    pub deps: Arc<Deps>,
    pub hub: InMemoryHub,
    pub cache_dir: tempfile::TempDir,
}

pub async fn build_harness(tmdb_base: Option<String>) -> ChainHarness {
    let pool: SqlitePool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite://:memory:")
        .await
        .expect("in-memory pool");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("migrations");

    let cache_dir = tempfile::tempdir().expect("cache dir");
    let mut config = AppConfig::default();
    config.cache.root = cache_dir.path().to_string_lossy().to_string();
    config.providers.fetch_timeout_secs = 5;

    let hub = InMemoryHub::new();
    let tmdb =
        tmdb_base.map(|base| Arc::new(TmdbClient::new("test-key".to_string(), Some(base))));

    let deps = Arc::new(Deps {
        config,
        libraries: Arc::new(SqliteLibraryRepository::new(pool.clone())),
        movies: Arc::new(SqliteMovieRepository::new(pool.clone())),
        actors: Arc::new(SqliteActorRepository::new(pool.clone())),
        jobs: Arc::new(SqliteJobStore::new(pool.clone())),
        candidates: Arc::new(SqliteCandidateStore::new(pool.clone())),
        cache_files: Arc::new(SqliteCacheFileStore::new(pool.clone())),
        provider_cache: Arc::new(SqliteProviderCacheStore::new(pool.clone())),
        refresh_log: Arc::new(SqliteRefreshLogStore::new(pool.clone())),
        settings: SettingsReader::new(Arc::new(SqliteSettingsStore::new(pool.clone()))),
        tmdb,
        fanart: None,
        http: reqwest::Client::new(),
        hub: Arc::new(hub.clone()),
        bulk: Arc::new(BulkController::new()),
        prober: Arc::new(NoopProber),
        notifier: Arc::new(LoggingNotifier),
    });

    ChainHarness {
        deps,
        hub,
        cache_dir,
    }
}

pub async fn seed_library(harness: &ChainHarness, root: &str) -> Library {
    harness
        .deps
        .libraries
        .create(Library {
            id: LibraryId(0),
            name: "Movies".to_string(),
            root_path: root.to_string(),
            kind: LibraryKind::Movie,
            enabled: true,
            automation: AutomationMode::Yolo,
            auto_scan: true,
            auto_identify: true,
            auto_enrich: true,
            auto_publish: true,
            notifiers: vec![NotifierKind::Kodi],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        })
        .await
        .expect("library")
}

/// Pump the queue synchronously until nothing is claimable. Retrying jobs
/// with future ready-times are left alone, so a rate-limited chain settles.
pub async fn run_until_idle(harness: &ChainHarness) -> usize {
    let (_tx, rx) = watch::channel(false);
    let mut processed = 0usize;
    loop {
        let claimed = harness
            .deps
            .jobs
            .claim("pump", 1)
            .await
            .expect("claim");
        let Some(job) = claimed.into_iter().next() else {
            break;
        };
        harness
            .deps
            .jobs
            .mark_processing(job.id, "pump")
            .await
            .expect("processing transition");

        let payload = match job.decode_payload() {
            Ok(payload) => payload,
            Err(err) => {
                harness
                    .deps
                    .jobs
                    .fail(job.id, &format!("invalid payload: {err}"), false, None)
                    .await
                    .expect("fail transition");
                continue;
            }
        };
        let ctx = JobContext {
            job_id: job.id,
            worker_id: "pump".to_string(),
            execution_time: chrono::Utc::now(),
            shutdown: rx.clone(),
        };
        match dispatch(&harness.deps, &ctx, payload).await {
            Ok(()) => {
                harness.deps.jobs.complete(job.id).await.expect("complete");
            }
            Err(err) => {
                harness
                    .deps
                    .jobs
                    .fail(job.id, &err.to_string(), err.is_transient(), err.retry_after.map(|s| chrono::Duration::seconds(s as i64)))
                    .await
                    .expect("fail transition");
            }
        }
        processed += 1;
        assert!(processed < 500, "chain did not terminate");
    }
    processed
}

/// Deterministic PNG, resolution-normalized per seed.
pub fn png_bytes(seed: u8, width: u32, height: u32) -> Vec<u8> {
    use image::{DynamicImage, Rgba, RgbaImage};
    let img = RgbaImage::from_fn(width, height, |x, y| {
        let fx = x as f32 / width as f32;
        let fy = y as f32 / height as f32;
        let t = match seed % 4 {
            0 => fx,
            1 => 1.0 - fx,
            2 => fy,
            _ => (fx + fy) / 2.0,
        };
        let v = (t * 255.0) as u8;
        Rgba([v, v / 2, seed.wrapping_mul(13), 255])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .expect("png encode");
    bytes
}

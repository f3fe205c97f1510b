// SPDX-License-Identifier: GPL-3.0-or-later
//! Shared fixture: a full dependency bundle over an in-memory database, with
//! provider clients pointed at a wiremock server and the cache rooted in a
//! temp directory.

use curarr_application::{BulkController, Deps, LoggingNotifier, StreamProber, WorkflowResult};
use curarr_config::AppConfig;
use curarr_domain::{
    AutomationMode, IdentificationStatus, Library, LibraryId, LibraryKind, MediaStream, Movie,
    MovieId, NotifierKind,
};
use curarr_infrastructure::repositories::NewMovie;
use curarr_infrastructure::{
    SettingsReader, SqliteActorRepository, SqliteCacheFileStore, SqliteCandidateStore,
    SqliteJobStore, SqliteLibraryRepository, SqliteMovieRepository, SqliteProviderCacheStore,
    SqliteRefreshLogStore, SqliteSettingsStore,
};
use curarr_metadata::{FanartTvClient, TmdbClient};
use curarr_realtime::InMemoryHub;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub async fn test_pool() -> SqlitePool {
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

/// Prober stub that returns a canned stream list.
pub struct StubProber {
    pub streams: Mutex<Vec<MediaStream>>,
}

#[async_trait::async_trait]
impl StreamProber for StubProber {
    async fn probe(&self, _path: &Path) -> WorkflowResult<Vec<MediaStream>> {
        Ok(self.streams.lock().expect("stub lock").clone())
    }
}

pub struct TestHarness {
    pub deps: Arc<Deps>,
    pub hub: InMemoryHub,
    pub pool: SqlitePool,
    // Held so the cache root outlives the harness.
    pub cache_dir: tempfile::TempDir,
}

/// Build a harness. `provider_base` is a wiremock URI used for both TMDB and
/// Fanart.tv; pass `None` for a providerless setup.
pub async fn build_harness(provider_base: Option<String>) -> TestHarness {
    let pool = test_pool().await;
    let cache_dir = tempfile::tempdir().expect("cache dir");

    let mut config = AppConfig::default();
    config.cache.root = cache_dir.path().to_string_lossy().to_string();
    config.providers.fetch_timeout_secs = 5;

    let hub = InMemoryHub::new();
    let tmdb = provider_base
        .clone()
        .map(|base| Arc::new(TmdbClient::new("test-key".to_string(), Some(base))));
    let fanart = provider_base
        .map(|base| Arc::new(FanartTvClient::new("test-key".to_string(), None, Some(base))));

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
        fanart,
        http: reqwest::Client::new(),
        hub: Arc::new(hub.clone()),
        bulk: Arc::new(BulkController::new()),
        prober: Arc::new(StubProber {
            streams: Mutex::new(Vec::new()),
        }),
        notifier: Arc::new(LoggingNotifier),
    });

    TestHarness {
        deps,
        hub,
        pool,
        cache_dir,
    }
}

pub async fn seed_library(harness: &TestHarness, root: &str) -> Library {
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

pub async fn seed_movie(harness: &TestHarness, library: LibraryId, directory: &str) -> Movie {
    harness
        .deps
        .movies
        .insert(NewMovie {
            library_id: library,
            title: "Inception".to_string(),
            year: Some(2010),
            tmdb_id: Some(27205),
            imdb_id: Some("tt1375666".to_string()),
            directory: directory.to_string(),
            video_file: None,
            video_hash: None,
            identification_status: IdentificationStatus::Identified,
        })
        .await
        .expect("movie")
}

/// A deterministic PNG keyed by `seed`. The pattern is resolution-normalized,
/// so the same seed at two sizes yields perceptual twins while different
/// seeds diverge well below the dedup threshold.
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

#[allow(dead_code)]
pub fn movie_id(movie: &Movie) -> MovieId {
    movie.id
}

// SPDX-License-Identifier: GPL-3.0-or-later
mod common;

use common::{build_harness, png_bytes, run_until_idle, seed_library};
use curarr_domain::{
    IdentificationStatus, JobPayload, JobPriority, JobSpec, JobState, WebhookEventType,
    WebhookMovie, WebhookPayload,
};
use curarr_infrastructure::repositories::NewMovie;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tmdb_movie_body(tmdb_id: i64, title: &str) -> serde_json::Value {
    json!({
        "id": tmdb_id,
        "imdb_id": "tt1375666",
        "title": title,
        "overview": "A thief who steals corporate secrets through dream-sharing technology.",
        "runtime": 148,
        "release_date": "2010-07-16",
        "vote_average": 8.4,
        "vote_count": 34000,
        "genres": [{ "id": 878, "name": "Science Fiction" }],
        "images": {
            "posters": [
                { "file_path": "/poster.png", "width": 400, "height": 600,
                  "vote_average": 7.0, "vote_count": 120, "iso_639_1": "en" }
            ],
            "backdrops": [
                { "file_path": "/backdrop.png", "width": 640, "height": 360,
                  "vote_average": 6.0, "vote_count": 60, "iso_639_1": null }
            ],
            "logos": []
        },
        "videos": { "results": [] },
        "credits": { "cast": [] },
        "release_dates": { "results": [] }
    })
}

async fn mount_images(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/img/poster.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png_bytes(2, 400, 600), "image/png"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/backdrop.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png_bytes(1, 640, 360), "image/png"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn fresh_movie_from_webhook_runs_the_whole_chain() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/movie/27205"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tmdb_movie_body(27205, "Inception")))
        .mount(&server)
        .await;
    mount_images(&server).await;

    let harness = build_harness(Some(server.uri())).await;
    let library_dir = tempfile::tempdir().unwrap();
    seed_library(&harness, &library_dir.path().to_string_lossy()).await;

    // A freshly-downloaded movie directory: video only, no NFO yet.
    let movie_dir = library_dir.path().join("Inception (2010)");
    std::fs::create_dir_all(&movie_dir).unwrap();
    std::fs::write(movie_dir.join("Inception (2010).mkv"), b"video bytes").unwrap();

    harness
        .deps
        .jobs
        .insert(
            JobSpec::new(JobPayload::WebhookReceived {
                payload: WebhookPayload {
                    source: "radarr".to_string(),
                    event_type: WebhookEventType::Download,
                    movie: Some(WebhookMovie {
                        id: 42,
                        title: "Inception".to_string(),
                        year: Some(2010),
                        path: Some(movie_dir.to_string_lossy().to_string()),
                        folder_path: Some(movie_dir.to_string_lossy().to_string()),
                        tmdb_id: Some(27205),
                        imdb_id: None,
                    }),
                    series: None,
                    episodes: Vec::new(),
                },
            })
            .with_priority(JobPriority::HIGH),
        )
        .await
        .unwrap();

    run_until_idle(&harness).await;

    // Entity exists, identified through the chain context, fully enriched.
    let movie = harness
        .deps
        .movies
        .get_by_tmdb_id(27205)
        .await
        .unwrap()
        .expect("movie inserted by chain");
    assert_eq!(movie.title, "Inception");
    assert_eq!(movie.identification_status, IdentificationStatus::Enriched);
    assert!(movie.enriched_at.is_some());

    // Kodi layout landed in the library directory.
    assert!(movie_dir.join("Inception (2010).nfo").exists());
    assert!(movie_dir.join("Inception (2010)-poster.png").exists());
    assert!(movie_dir.join("Inception (2010)-fanart.png").exists());

    // Events and chain termination.
    assert!(!harness.hub.events_of_type("enrichment.complete").is_empty());
    assert!(!harness.hub.events_of_type("entity.published").is_empty());
    let stats = harness.deps.jobs.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn webhook_fans_out_to_every_enabled_notifier() {
    let harness = build_harness(None).await;
    let library_dir = tempfile::tempdir().unwrap();
    let mut library = seed_library(&harness, &library_dir.path().to_string_lossy()).await;
    library.notifiers = curarr_domain::NotifierKind::ALL.to_vec();
    harness.deps.libraries.update(library).await.unwrap();

    let movie_dir = library_dir.path().join("Moana (2016)");
    std::fs::create_dir_all(&movie_dir).unwrap();
    std::fs::write(movie_dir.join("Moana (2016).mkv"), b"video bytes").unwrap();

    harness
        .deps
        .jobs
        .insert(
            JobSpec::new(JobPayload::WebhookReceived {
                payload: WebhookPayload {
                    source: "radarr".to_string(),
                    event_type: WebhookEventType::Download,
                    movie: Some(WebhookMovie {
                        id: 7,
                        title: "Moana".to_string(),
                        year: Some(2016),
                        path: Some(movie_dir.to_string_lossy().to_string()),
                        folder_path: Some(movie_dir.to_string_lossy().to_string()),
                        tmdb_id: Some(277834),
                        imdb_id: None,
                    }),
                    series: None,
                    episodes: Vec::new(),
                },
            })
            .with_priority(JobPriority::HIGH),
        )
        .await
        .unwrap();

    run_until_idle(&harness).await;

    // Each player got a scan invocation; the message channels completed
    // without leaving anything behind.
    let players: Vec<String> = harness
        .hub
        .events_of_type("playerStatus")
        .iter()
        .filter_map(|e| e.data["player"].as_str().map(str::to_string))
        .collect();
    for player in ["kodi", "jellyfin", "plex"] {
        assert!(players.iter().any(|p| p == player), "missing {player} scan");
    }
    let stats = harness.deps.jobs.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn grab_events_do_not_start_a_chain() {
    let harness = build_harness(None).await;
    let library_dir = tempfile::tempdir().unwrap();
    seed_library(&harness, &library_dir.path().to_string_lossy()).await;

    harness
        .deps
        .jobs
        .insert(JobSpec::new(JobPayload::WebhookReceived {
            payload: WebhookPayload {
                source: "radarr".to_string(),
                event_type: WebhookEventType::Grab,
                movie: None,
                series: None,
                episodes: Vec::new(),
            },
        }))
        .await
        .unwrap();

    let processed = run_until_idle(&harness).await;
    assert_eq!(processed, 1);
    let stats = harness.deps.jobs.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn rate_limited_bulk_run_stops_and_preserves_remaining_movies() {
    let server = MockServer::start().await;
    // First two movies fetch fine; everything after is throttled.
    for tmdb_id in [101, 102] {
        Mock::given(method("GET"))
            .and(path(format!("/movie/{tmdb_id}")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(tmdb_movie_body(tmdb_id, "Movie")),
            )
            .mount(&server)
            .await;
    }
    for tmdb_id in [103, 104, 105] {
        Mock::given(method("GET"))
            .and(path(format!("/movie/{tmdb_id}")))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "3600")
                    .set_body_string("throttled"),
            )
            .mount(&server)
            .await;
    }
    mount_images(&server).await;

    let harness = build_harness(Some(server.uri())).await;
    let library_dir = tempfile::tempdir().unwrap();
    let library = seed_library(&harness, &library_dir.path().to_string_lossy()).await;

    for tmdb_id in [101i64, 102, 103, 104, 105] {
        let dir = library_dir.path().join(format!("Movie {tmdb_id} (2020)"));
        std::fs::create_dir_all(&dir).unwrap();
        harness
            .deps
            .movies
            .insert(NewMovie {
                library_id: library.id,
                title: format!("Movie {tmdb_id}"),
                year: Some(2020),
                tmdb_id: Some(tmdb_id),
                imdb_id: None,
                directory: dir.to_string_lossy().to_string(),
                video_file: None,
                video_hash: None,
                identification_status: IdentificationStatus::Identified,
            })
            .await
            .unwrap();
    }

    let enqueued = harness.deps.bulk.start_run(&harness.deps).await.unwrap();
    assert_eq!(enqueued, 5);

    run_until_idle(&harness).await;

    let stats = harness.deps.bulk.stats();
    assert!(stats.stopped);
    assert!(stats
        .stop_reason
        .as_deref()
        .unwrap_or_default()
        .contains("rate_limit"));
    assert_eq!(stats.processed, 2);

    // The throttled movie's job is parked for retry; the cancelled tail kept
    // its pre-run state.
    assert!(!harness.hub.events_of_type("bulk.rate_limit").is_empty());
    for tmdb_id in [104i64, 105] {
        let movie = harness
            .deps
            .movies
            .get_by_tmdb_id(tmdb_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(movie.identification_status, IdentificationStatus::Identified);
        assert!(movie.enriched_at.is_none());
    }

    let queue = harness.deps.jobs.stats().await.unwrap();
    assert_eq!(queue.cancelled, 2, "tail of the bulk run is cancelled");
    assert!(!harness.deps.bulk.is_running());
}

#[tokio::test]
async fn duplicate_bulk_runs_are_rejected() {
    let harness = build_harness(None).await;
    let library_dir = tempfile::tempdir().unwrap();
    let library = seed_library(&harness, &library_dir.path().to_string_lossy()).await;
    let dir = library_dir.path().join("Movie (2020)");
    std::fs::create_dir_all(&dir).unwrap();
    harness
        .deps
        .movies
        .insert(NewMovie {
            library_id: library.id,
            title: "Movie".to_string(),
            year: Some(2020),
            tmdb_id: Some(7),
            imdb_id: None,
            directory: dir.to_string_lossy().to_string(),
            video_file: None,
            video_hash: None,
            identification_status: IdentificationStatus::Identified,
        })
        .await
        .unwrap();

    harness.deps.bulk.start_run(&harness.deps).await.unwrap();
    let second = harness.deps.bulk.start_run(&harness.deps).await;
    assert!(second.is_err());
}

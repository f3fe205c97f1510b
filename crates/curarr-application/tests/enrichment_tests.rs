// SPDX-License-Identifier: GPL-3.0-or-later
mod common;

use common::{build_harness, png_bytes, seed_library, seed_movie};
use curarr_application::{EnrichmentOptions, EnrichmentPipeline};
use curarr_domain::{AssetKind, EntityRef, ScalarField, SelectionPolicy};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_tmdb_movie(server: &MockServer, posters: &[(&str, u32, u32, f64, i64)]) {
    let poster_entries: Vec<serde_json::Value> = posters
        .iter()
        .map(|(file, w, h, avg, count)| {
            json!({
                "file_path": format!("/{file}"),
                "width": w,
                "height": h,
                "vote_average": avg,
                "vote_count": count,
                "iso_639_1": "en"
            })
        })
        .collect();

    Mock::given(method("GET"))
        .and(path("/movie/27205"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 27205,
            "imdb_id": "tt1375666",
            "title": "Inception",
            "overview": "A thief who steals corporate secrets through dream-sharing technology.",
            "tagline": "Your mind is the scene of the crime.",
            "runtime": 148,
            "release_date": "2010-07-16",
            "vote_average": 8.4,
            "vote_count": 34000,
            "genres": [{ "id": 878, "name": "Science Fiction" }],
            "images": {
                "posters": poster_entries,
                "backdrops": [],
                "logos": []
            },
            "videos": { "results": [] },
            "credits": { "cast": [
                { "id": 6193, "name": "Leonardo DiCaprio", "character": "Cobb", "order": 0 }
            ]},
            "release_dates": { "results": [] }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/movies/27205"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

async fn mount_image(server: &MockServer, name: &str, bytes: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/img/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(bytes, "image/png"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn locked_title_survives_enrichment_while_plot_updates() {
    let server = MockServer::start().await;
    mount_tmdb_movie(&server, &[("poster-a.png", 400, 600, 6.0, 100)]).await;
    mount_image(&server, "poster-a.png", png_bytes(2, 400, 600)).await;

    let harness = build_harness(Some(server.uri())).await;
    let library = seed_library(&harness, "/media/movies").await;
    let movie = seed_movie(&harness, library.id, "/media/movies/Inception (2010)").await;

    // Lock the title to a user edit.
    let mut locked = movie.clone();
    locked.title = "Inception: Director's Cut".to_string();
    locked.locked_fields = vec![ScalarField::Title];
    harness.deps.movies.update(locked).await.unwrap();

    let pipeline = EnrichmentPipeline::new(&harness.deps);
    pipeline
        .run_metadata_phases(movie.id, EnrichmentOptions::default())
        .await
        .unwrap();
    pipeline.run_selection(movie.id).await.unwrap();

    let after = harness.deps.movies.get_by_id(movie.id).await.unwrap().unwrap();
    assert_eq!(after.title, "Inception: Director's Cut");
    assert_eq!(
        after.plot.as_deref(),
        Some("A thief who steals corporate secrets through dream-sharing technology.")
    );
    assert!(after.enriched_at.is_some());
    assert_eq!(
        after.identification_status,
        curarr_domain::IdentificationStatus::Enriched
    );
}

#[tokio::test]
async fn near_duplicate_poster_loses_to_higher_scoring_twin() {
    let server = MockServer::start().await;
    // Same visual pattern at two sizes: perceptual twins, different scores.
    mount_tmdb_movie(
        &server,
        &[
            ("poster-big.png", 800, 1200, 7.0, 200),
            ("poster-small.png", 400, 600, 7.0, 200),
        ],
    )
    .await;
    mount_image(&server, "poster-big.png", png_bytes(2, 800, 1200)).await;
    mount_image(&server, "poster-small.png", png_bytes(2, 400, 600)).await;

    let harness = build_harness(Some(server.uri())).await;
    let library = seed_library(&harness, "/media/movies").await;
    let movie = seed_movie(&harness, library.id, "/media/movies/Inception (2010)").await;

    // Two slots available, so only dedup can explain a single winner.
    harness
        .deps
        .settings
        .set_selection_policy(&SelectionPolicy {
            max_posters: 2,
            ..SelectionPolicy::default()
        })
        .await
        .unwrap();

    let pipeline = EnrichmentPipeline::new(&harness.deps);
    pipeline
        .run_metadata_phases(movie.id, EnrichmentOptions::default())
        .await
        .unwrap();
    pipeline.run_selection(movie.id).await.unwrap();

    let entity = EntityRef::movie(movie.id);
    let candidates = harness
        .deps
        .candidates
        .list_for_entity(entity, Some(AssetKind::Poster))
        .await
        .unwrap();
    let selected: Vec<_> = candidates.iter().filter(|c| c.is_selected).collect();
    assert_eq!(selected.len(), 1, "perceptual twin must be deduplicated");
    assert!(selected[0].url.ends_with("poster-big.png"));
    assert!(selected[0].score > candidates
        .iter()
        .find(|c| c.url.ends_with("poster-small.png"))
        .unwrap()
        .score);

    // The loser has no cache file.
    let loser_hash = candidates
        .iter()
        .find(|c| c.url.ends_with("poster-small.png"))
        .unwrap()
        .content_hash
        .clone()
        .unwrap();
    assert!(harness
        .deps
        .cache_files
        .get_by_hash(entity, &loser_hash)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn selection_respects_per_kind_limit() {
    let server = MockServer::start().await;
    mount_tmdb_movie(
        &server,
        &[
            ("p1.png", 400, 600, 8.0, 300),
            ("p2.png", 400, 600, 7.0, 300),
            ("p3.png", 400, 600, 6.0, 300),
        ],
    )
    .await;
    // Visually distinct seeds.
    mount_image(&server, "p1.png", png_bytes(1, 400, 600)).await;
    mount_image(&server, "p2.png", png_bytes(2, 400, 600)).await;
    mount_image(&server, "p3.png", png_bytes(7, 400, 600)).await;

    let harness = build_harness(Some(server.uri())).await;
    let library = seed_library(&harness, "/media/movies").await;
    let movie = seed_movie(&harness, library.id, "/media/movies/Inception (2010)").await;

    harness
        .deps
        .settings
        .set_selection_policy(&SelectionPolicy {
            max_posters: 2,
            ..SelectionPolicy::default()
        })
        .await
        .unwrap();

    let pipeline = EnrichmentPipeline::new(&harness.deps);
    pipeline
        .run_metadata_phases(movie.id, EnrichmentOptions::default())
        .await
        .unwrap();
    pipeline.run_selection(movie.id).await.unwrap();

    let selected = harness
        .deps
        .candidates
        .selected_ids(EntityRef::movie(movie.id), AssetKind::Poster)
        .await
        .unwrap();
    assert!(selected.len() <= 2);
    assert!(!selected.is_empty());
}

#[tokio::test]
async fn pipeline_emits_phase_and_completion_events() {
    let server = MockServer::start().await;
    mount_tmdb_movie(&server, &[("poster-a.png", 400, 600, 6.0, 50)]).await;
    mount_image(&server, "poster-a.png", png_bytes(3, 400, 600)).await;

    let harness = build_harness(Some(server.uri())).await;
    let library = seed_library(&harness, "/media/movies").await;
    let movie = seed_movie(&harness, library.id, "/media/movies/Inception (2010)").await;

    let pipeline = EnrichmentPipeline::new(&harness.deps);
    pipeline
        .run_metadata_phases(movie.id, EnrichmentOptions::default())
        .await
        .unwrap();
    pipeline.run_selection(movie.id).await.unwrap();

    assert_eq!(harness.hub.events_of_type("enrichment.started").len(), 1);
    let phases = harness.hub.events_of_type("enrichment.phase.complete");
    assert_eq!(phases.len(), 5);
    assert_eq!(harness.hub.events_of_type("enrichment.complete").len(), 1);
}

#[tokio::test]
async fn rerunning_selection_is_a_noop() {
    let server = MockServer::start().await;
    mount_tmdb_movie(&server, &[("poster-a.png", 400, 600, 6.0, 50)]).await;
    mount_image(&server, "poster-a.png", png_bytes(4, 400, 600)).await;

    let harness = build_harness(Some(server.uri())).await;
    let library = seed_library(&harness, "/media/movies").await;
    let movie = seed_movie(&harness, library.id, "/media/movies/Inception (2010)").await;

    let pipeline = EnrichmentPipeline::new(&harness.deps);
    pipeline
        .run_metadata_phases(movie.id, EnrichmentOptions::default())
        .await
        .unwrap();
    pipeline.run_selection(movie.id).await.unwrap();

    let entity = EntityRef::movie(movie.id);
    let first = harness
        .deps
        .candidates
        .selected_ids(entity, AssetKind::Poster)
        .await
        .unwrap();
    let first_selected_at = harness
        .deps
        .candidates
        .get(first[0])
        .await
        .unwrap()
        .unwrap()
        .selected_at;

    pipeline.run_selection(movie.id).await.unwrap();
    let second = harness
        .deps
        .candidates
        .selected_ids(entity, AssetKind::Poster)
        .await
        .unwrap();
    assert_eq!(first, second);
    // Identical set: the previous selection stamp is untouched.
    let second_selected_at = harness
        .deps
        .candidates
        .get(first[0])
        .await
        .unwrap()
        .unwrap()
        .selected_at;
    assert_eq!(first_selected_at, second_selected_at);
}

// SPDX-License-Identifier: GPL-3.0-or-later
//! Provider cache orchestration: serve merged metadata from the cache when it
//! is fresh, otherwise fan out to every configured provider concurrently,
//! merge what came back, and cache the result.

use chrono::{Duration, Utc};
use curarr_domain::{
    CastCredit, EntityKind, MetadataRecord, Provider, ProviderImage, ProviderVideo, RatingEntry,
};
use curarr_metadata::{FanartTvClient, MovieArtwork, ProviderCallError, TmdbClient, TmdbMovie};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::deps::Deps;
use crate::errors::{WorkflowError, WorkflowResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Cache,
    Live,
    Mixed,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub force_refresh: bool,
}

/// Merged record plus provenance. `record` is `None` when every provider
/// failed; the caller skips gracefully instead of aborting.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub record: Option<MetadataRecord>,
    pub source: FetchSource,
    pub providers: Vec<Provider>,
    pub degraded: Vec<Provider>,
    pub age: Duration,
}

pub async fn fetch_movie_metadata(
    deps: &Deps,
    tmdb_id: i64,
    options: &FetchOptions,
) -> WorkflowResult<FetchOutcome> {
    let cache_key = format!("tmdb:{tmdb_id}");
    let ttl = Duration::days(deps.config.providers.cache_ttl_days);

    if !options.force_refresh {
        if let Some((record, fetched_at)) = deps
            .provider_cache
            .get(EntityKind::Movie, &cache_key)
            .await?
        {
            let age = Utc::now() - fetched_at;
            if age <= ttl {
                debug!(target: "providers", tmdb_id, age_hours = age.num_hours(), "provider cache hit");
                return Ok(FetchOutcome {
                    record: Some(record),
                    source: FetchSource::Cache,
                    providers: Vec::new(),
                    degraded: Vec::new(),
                    age,
                });
            }
        }
    }

    let deadline = std::time::Duration::from_secs(deps.config.providers.fetch_timeout_secs);
    let language = deps.config.providers.preferred_language.clone();

    deps.hub.broadcast(
        "providerScrapeStarted",
        serde_json::json!({ "tmdbId": tmdb_id }),
    );

    let tmdb_call = call_tmdb(deps.tmdb.clone(), tmdb_id, language, deadline);
    let fanart_call = call_fanart(deps.fanart.clone(), tmdb_id, deadline);
    let (tmdb_result, fanart_result) = tokio::join!(tmdb_call, fanart_call);

    let mut providers = Vec::new();
    let mut degraded = Vec::new();
    let mut rate_limited: Option<WorkflowError> = None;

    let tmdb_movie = settle(
        tmdb_result,
        Provider::Tmdb,
        &mut providers,
        &mut degraded,
        &mut rate_limited,
    );
    let fanart_artwork = settle(
        fanart_result,
        Provider::FanartTv,
        &mut providers,
        &mut degraded,
        &mut rate_limited,
    );

    if providers.is_empty() {
        // A pure rate limit must bubble so bulk runs can stop; anything else
        // degrades to "no data".
        deps.hub.broadcast(
            "providerScrapeFailed",
            serde_json::json!({ "tmdbId": tmdb_id }),
        );
        if let Some(err) = rate_limited {
            return Err(err);
        }
        warn!(target: "providers", tmdb_id, "all providers failed or timed out");
        return Ok(FetchOutcome {
            record: None,
            source: FetchSource::Live,
            providers,
            degraded,
            age: Duration::zero(),
        });
    }

    let image_url = |path: &str| {
        deps.tmdb
            .as_ref()
            .map(|c| c.image_url(path))
            .unwrap_or_else(|| path.to_string())
    };
    let record = merge_providers(tmdb_movie.as_ref(), fanart_artwork.as_ref(), image_url);
    deps.provider_cache
        .put(EntityKind::Movie, &cache_key, &record, Utc::now())
        .await?;

    let source = if degraded.is_empty() {
        FetchSource::Live
    } else {
        FetchSource::Mixed
    };
    info!(
        target: "providers",
        tmdb_id,
        providers = providers.len(),
        degraded = degraded.len(),
        images = record.images.len(),
        "provider metadata merged"
    );
    deps.hub.broadcast(
        "providerScrapeComplete",
        serde_json::json!({ "tmdbId": tmdb_id, "images": record.images.len() }),
    );
    Ok(FetchOutcome {
        record: Some(record),
        source,
        providers,
        degraded,
        age: Duration::zero(),
    })
}

async fn call_tmdb(
    client: Option<Arc<TmdbClient>>,
    tmdb_id: i64,
    language: String,
    deadline: std::time::Duration,
) -> Option<Result<TmdbMovie, ProviderCallError>> {
    let client = client?;
    match tokio::time::timeout(deadline, client.fetch_movie(tmdb_id, &language)).await {
        Ok(result) => Some(result),
        Err(_) => Some(Err(ProviderCallError::Api {
            message: format!("tmdb deadline exceeded after {}s", deadline.as_secs()),
        })),
    }
}

async fn call_fanart(
    client: Option<Arc<FanartTvClient>>,
    tmdb_id: i64,
    deadline: std::time::Duration,
) -> Option<Result<MovieArtwork, ProviderCallError>> {
    let client = client?;
    match tokio::time::timeout(deadline, client.fetch_movie_artwork(tmdb_id)).await {
        Ok(result) => Some(result),
        Err(_) => Some(Err(ProviderCallError::Api {
            message: format!("fanart.tv deadline exceeded after {}s", deadline.as_secs()),
        })),
    }
}

fn settle<T>(
    result: Option<Result<T, ProviderCallError>>,
    provider: Provider,
    providers: &mut Vec<Provider>,
    degraded: &mut Vec<Provider>,
    rate_limited: &mut Option<WorkflowError>,
) -> Option<T> {
    match result {
        None => None,
        Some(Ok(value)) => {
            providers.push(provider);
            Some(value)
        }
        Some(Err(err)) => {
            warn!(target: "providers", provider = %provider, error = %err, "provider degraded");
            if err.is_rate_limit() {
                *rate_limited = Some(err.into());
            }
            degraded.push(provider);
            None
        }
    }
}

/// Scalars follow per-provider priority (TMDB over Fanart.tv); arrays are
/// unioned with provider-tagged origin.
fn merge_providers(
    tmdb: Option<&TmdbMovie>,
    fanart: Option<&MovieArtwork>,
    image_url: impl Fn(&str) -> String,
) -> MetadataRecord {
    let mut record = MetadataRecord::default();

    if let Some(movie) = tmdb {
        record.tmdb_id = Some(movie.id);
        record.imdb_id = movie.imdb_id.clone();
        record.title = Some(movie.title.clone());
        record.original_title = movie.original_title.clone();
        record.year = movie.year();
        record.plot = movie.overview.clone();
        record.tagline = movie.tagline.clone();
        record.runtime = movie.runtime;
        record.content_rating = movie.certification();
        record.premiered = movie.release_date.clone();
        record.genres = movie.genres.iter().map(|g| g.name.clone()).collect();
        record.studios = movie
            .production_companies
            .iter()
            .map(|c| c.name.clone())
            .collect();
        record.countries = movie
            .production_countries
            .iter()
            .map(|c| c.name.clone())
            .collect();
        if let (Some(avg), Some(count)) = (movie.vote_average, movie.vote_count) {
            record.ratings.push(RatingEntry {
                source: "themoviedb".to_string(),
                value: avg,
                votes: count,
            });
        }
        if let Some(collection) = &movie.belongs_to_collection {
            record.collection_tmdb_id = Some(collection.id);
            record.collection_name = Some(collection.name.clone());
            record.collection_overview = collection.overview.clone();
        }
        for field in [
            "title",
            "original_title",
            "year",
            "plot",
            "tagline",
            "runtime",
            "content_rating",
            "premiered",
        ] {
            record.origins.insert(field.to_string(), Provider::Tmdb);
        }

        for (image_type, images) in [
            ("poster", &movie.images.posters),
            ("backdrop", &movie.images.backdrops),
            ("logo", &movie.images.logos),
        ] {
            for image in images {
                record.images.push(ProviderImage {
                    provider: Provider::Tmdb,
                    image_type: image_type.to_string(),
                    url: image_url(&image.file_path),
                    width: image.width,
                    height: image.height,
                    vote_average: image.vote_average,
                    vote_count: image.vote_count,
                    language: image.iso_639_1.clone(),
                    is_hd: image.width.unwrap_or(0) >= 1920,
                });
            }
        }

        for video in &movie.videos.results {
            if let Some(url) = video.url() {
                record.videos.push(ProviderVideo {
                    provider: Provider::Tmdb,
                    url,
                    name: video.name.clone(),
                    site: video.site.clone(),
                    video_type: video.video_type.clone(),
                    language: video.iso_639_1.clone(),
                });
            }
        }

        for member in &movie.credits.cast {
            record.cast.push(CastCredit {
                provider: Provider::Tmdb,
                person_id: member.id,
                name: member.name.clone(),
                role: member.character.clone(),
                sort_order: member.order.unwrap_or(i32::MAX),
                profile_url: member.profile_path.as_deref().map(&image_url),
            });
        }
    }

    if let Some(artwork) = fanart {
        for (image_type, images) in [
            ("movieposter", &artwork.posters),
            ("moviebackground", &artwork.backgrounds),
            ("hdmovielogo", &artwork.hd_logos),
            ("moviebanner", &artwork.banners),
            ("moviethumb", &artwork.thumbs),
        ] {
            for image in images {
                record.images.push(ProviderImage {
                    provider: Provider::FanartTv,
                    image_type: image_type.to_string(),
                    url: image.url.clone(),
                    width: None,
                    height: None,
                    vote_average: None,
                    vote_count: image.likes.map(|l| l as i64),
                    language: image.language.clone(),
                    is_hd: image_type.starts_with("hd"),
                });
            }
        }
    }

    record
}

// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::error::{retry_after_header, status_error, ProviderCallError, Result};

const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/original";

pub struct TmdbClient {
    api_key: String,
    client: Client,
    rate_limiter: Arc<Semaphore>,
    cache_movie: Cache<i64, TmdbMovie>,
    base_url: String,
    image_base_url: String,
}

impl TmdbClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self::new_with_limits(api_key, 4, base_url)
    }

    pub fn new_with_limits(
        api_key: String,
        max_concurrent_requests: usize,
        base_url: Option<String>,
    ) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        // When tests point us at a mock server, image URLs resolve there too.
        let image_base_url = if base_url == DEFAULT_BASE_URL {
            IMAGE_BASE_URL.to_string()
        } else {
            format!("{base_url}/img")
        };
        Self {
            api_key,
            client: Client::new(),
            rate_limiter: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            cache_movie: Cache::new(10_000),
            base_url,
            image_base_url,
        }
    }

    /// Full movie record: details, images, videos and credits in one call.
    #[instrument(skip(self), fields(tmdb_id = tmdb_id))]
    pub async fn fetch_movie(&self, tmdb_id: i64, language: &str) -> Result<TmdbMovie> {
        if let Some(cached) = self.cache_movie.get(&tmdb_id) {
            return Ok(cached);
        }

        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| ProviderCallError::RateLimiterClosed)?;

        let url = format!(
            "{}/movie/{}?api_key={}&language={}&append_to_response=images,videos,credits,release_dates&include_image_language={},en,null",
            self.base_url, tmdb_id, self.api_key, language, language
        );
        debug!(target: "tmdb", tmdb_id, "fetching movie");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let retry_after = retry_after_header(&response);
        let body = response.text().await?;

        if !status.is_success() {
            return Err(status_error(
                status,
                body,
                retry_after,
                &format!("movie/{tmdb_id}"),
            ));
        }

        let movie: TmdbMovie = serde_json::from_str(&body)?;
        self.cache_movie.insert(tmdb_id, movie.clone());
        Ok(movie)
    }

    /// Whether the movie changed at the provider since `since`. Drives the
    /// refresh-log optimization for scheduled updates.
    #[instrument(skip(self), fields(tmdb_id = tmdb_id))]
    pub async fn movie_changed_since(
        &self,
        tmdb_id: i64,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| ProviderCallError::RateLimiterClosed)?;

        let url = format!(
            "{}/movie/{}/changes?api_key={}&start_date={}",
            self.base_url,
            tmdb_id,
            self.api_key,
            since.format("%Y-%m-%d")
        );
        debug!(target: "tmdb", tmdb_id, "checking changes");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let retry_after = retry_after_header(&response);
        let body = response.text().await?;

        if !status.is_success() {
            return Err(status_error(
                status,
                body,
                retry_after,
                &format!("movie/{tmdb_id}/changes"),
            ));
        }

        let changes: ChangesResponse = serde_json::from_str(&body)?;
        Ok(!changes.changes.is_empty())
    }

    /// Absolute URL for a TMDB image path.
    pub fn image_url(&self, file_path: &str) -> String {
        format!("{}{}", self.image_base_url, file_path)
    }
}

// ----------------------------------------------------------------------------
// Response shapes
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbMovie {
    pub id: i64,
    #[serde(default)]
    pub imdb_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub runtime: Option<i32>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub vote_count: Option<i64>,
    #[serde(default)]
    pub genres: Vec<NamedEntry>,
    #[serde(default)]
    pub production_companies: Vec<NamedEntry>,
    #[serde(default)]
    pub production_countries: Vec<CountryEntry>,
    #[serde(default)]
    pub belongs_to_collection: Option<TmdbCollection>,
    #[serde(default)]
    pub images: TmdbImages,
    #[serde(default)]
    pub videos: TmdbVideos,
    #[serde(default)]
    pub credits: TmdbCredits,
    #[serde(default)]
    pub release_dates: TmdbReleaseDates,
}

impl TmdbMovie {
    /// Release year parsed from `release_date`.
    pub fn year(&self) -> Option<i32> {
        self.release_date
            .as_deref()
            .and_then(|d| d.split('-').next())
            .and_then(|y| y.parse().ok())
    }

    /// US theatrical certification, when present.
    pub fn certification(&self) -> Option<String> {
        self.release_dates
            .results
            .iter()
            .find(|entry| entry.iso_3166_1 == "US")
            .and_then(|entry| {
                entry
                    .release_dates
                    .iter()
                    .map(|rd| rd.certification.trim())
                    .find(|cert| !cert.is_empty())
                    .map(str::to_string)
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedEntry {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountryEntry {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbCollection {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub overview: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbImages {
    #[serde(default)]
    pub posters: Vec<TmdbImage>,
    #[serde(default)]
    pub backdrops: Vec<TmdbImage>,
    #[serde(default)]
    pub logos: Vec<TmdbImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbImage {
    pub file_path: String,
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub vote_count: Option<i64>,
    #[serde(default)]
    pub iso_639_1: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbVideos {
    #[serde(default)]
    pub results: Vec<TmdbVideo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbVideo {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(rename = "type", default)]
    pub video_type: Option<String>,
    #[serde(default)]
    pub iso_639_1: Option<String>,
}

impl TmdbVideo {
    /// Site-qualified watch URL; only YouTube-hosted videos resolve.
    pub fn url(&self) -> Option<String> {
        match self.site.as_deref() {
            Some("YouTube") => Some(format!("https://www.youtube.com/watch?v={}", self.key)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbCredits {
    #[serde(default)]
    pub cast: Vec<TmdbCastMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbCastMember {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default)]
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbReleaseDates {
    #[serde(default)]
    pub results: Vec<ReleaseDatesEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseDatesEntry {
    pub iso_3166_1: String,
    #[serde(default)]
    pub release_dates: Vec<ReleaseDateItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseDateItem {
    #[serde(default)]
    pub certification: String,
}

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    #[serde(default)]
    changes: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_comes_from_release_date() {
        let movie: TmdbMovie = serde_json::from_value(serde_json::json!({
            "id": 27205,
            "title": "Inception",
            "release_date": "2010-07-16"
        }))
        .unwrap();
        assert_eq!(movie.year(), Some(2010));
    }

    #[test]
    fn certification_prefers_first_nonempty_us_entry() {
        let movie: TmdbMovie = serde_json::from_value(serde_json::json!({
            "id": 27205,
            "title": "Inception",
            "release_dates": { "results": [
                { "iso_3166_1": "DE", "release_dates": [{ "certification": "12" }] },
                { "iso_3166_1": "US", "release_dates": [
                    { "certification": "" },
                    { "certification": "PG-13" }
                ]}
            ]}
        }))
        .unwrap();
        assert_eq!(movie.certification().as_deref(), Some("PG-13"));
    }

    #[test]
    fn only_youtube_videos_resolve_to_urls() {
        let yt = TmdbVideo {
            key: "abc".into(),
            name: None,
            site: Some("YouTube".into()),
            video_type: Some("Trailer".into()),
            iso_639_1: None,
        };
        assert_eq!(
            yt.url().as_deref(),
            Some("https://www.youtube.com/watch?v=abc")
        );
        let other = TmdbVideo {
            site: Some("Vimeo".into()),
            ..yt
        };
        assert!(other.url().is_none());
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
use moka::sync::Cache;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::error::{retry_after_header, status_error, ProviderCallError, Result};

pub struct FanartTvClient {
    api_key: String,
    client_key: Option<String>,
    client: Client,
    rate_limiter: Arc<Semaphore>,
    cache_movie: Cache<i64, MovieArtwork>,
    base_url: String,
}

impl FanartTvClient {
    pub fn new(api_key: String, client_key: Option<String>, base_url: Option<String>) -> Self {
        Self::new_with_limits(api_key, client_key, 2, base_url)
    }

    pub fn new_with_limits(
        api_key: String,
        client_key: Option<String>,
        max_concurrent_requests: usize,
        base_url: Option<String>,
    ) -> Self {
        Self {
            api_key,
            client_key,
            client: Client::new(),
            rate_limiter: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            cache_movie: Cache::new(10_000),
            base_url: base_url
                .unwrap_or_else(|| "https://webservice.fanart.tv/v3".to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    #[instrument(skip(self), fields(tmdb_id = tmdb_id))]
    pub async fn fetch_movie_artwork(&self, tmdb_id: i64) -> Result<MovieArtwork> {
        if let Some(cached) = self.cache_movie.get(&tmdb_id) {
            return Ok(cached);
        }

        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| ProviderCallError::RateLimiterClosed)?;

        let url = format!("{}/movies/{}", self.base_url, tmdb_id);
        debug!(target: "fanarttv", url = %url, "fetching movie artwork");

        let response = self.request(self.client.get(&url)).send().await?;

        let status = response.status();
        let retry_after = retry_after_header(&response);
        let body = response.text().await?;
        let value = parse_fanarttv_body(status, retry_after, &body, &format!("movies/{tmdb_id}"))?;
        let artwork = parse_movie_artwork(value)?;
        self.cache_movie.insert(tmdb_id, artwork.clone());
        Ok(artwork)
    }

    fn request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("api-key", self.api_key.trim());
        match self.client_key.as_deref() {
            Some(client_key) if !client_key.trim().is_empty() => {
                request.header("client-key", client_key.trim())
            }
            _ => request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanartImage {
    pub url: String,
    pub likes: Option<u32>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MovieArtwork {
    pub posters: Vec<FanartImage>,
    pub backgrounds: Vec<FanartImage>,
    pub hd_logos: Vec<FanartImage>,
    pub banners: Vec<FanartImage>,
    pub thumbs: Vec<FanartImage>,
}

#[derive(Debug, Deserialize)]
struct ArtworkItem {
    url: String,
    likes: Option<String>,
    lang: Option<String>,
}

fn parse_fanarttv_body(
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    response_body: &str,
    resource: &str,
) -> Result<Value> {
    if !status.is_success() {
        return Err(status_error(
            status,
            response_body.to_string(),
            retry_after,
            resource,
        ));
    }

    let value: Value = serde_json::from_str(response_body)?;
    if let Some(message) = value
        .get("error")
        .and_then(|error| error.as_str())
        .or_else(|| value.get("message").and_then(|message| message.as_str()))
    {
        return Err(ProviderCallError::Api {
            message: message.to_string(),
        });
    }

    Ok(value)
}

fn parse_movie_artwork(value: Value) -> Result<MovieArtwork> {
    Ok(MovieArtwork {
        posters: parse_images(&value, "movieposter")?,
        backgrounds: parse_images(&value, "moviebackground")?,
        hd_logos: parse_images(&value, "hdmovielogo")?,
        banners: parse_images(&value, "moviebanner")?,
        thumbs: parse_images(&value, "moviethumb")?,
    })
}

fn parse_images(value: &Value, field: &str) -> Result<Vec<FanartImage>> {
    let Some(raw_images) = value.get(field) else {
        return Ok(Vec::new());
    };

    let items: Vec<ArtworkItem> = serde_json::from_value(raw_images.clone())?;
    Ok(items
        .into_iter()
        .map(|item| FanartImage {
            url: item.url,
            likes: item.likes.and_then(|likes| likes.parse::<u32>().ok()),
            language: item.lang.filter(|lang| !lang.is_empty() && lang != "00"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_language_markers_are_dropped() {
        let value = serde_json::json!({
            "movieposter": [
                { "url": "https://img/p1.jpg", "likes": "3", "lang": "en" },
                { "url": "https://img/p2.jpg", "likes": "1", "lang": "00" }
            ]
        });
        let artwork = parse_movie_artwork(value).unwrap();
        assert_eq!(artwork.posters[0].language.as_deref(), Some("en"));
        assert_eq!(artwork.posters[1].language, None);
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
//! The dependency bundle constructed once at startup and passed down to every
//! handler. No global mutable state; everything reaches services through this
//! struct.

use curarr_config::AppConfig;
use curarr_domain::{LibraryId, MediaStream};
use curarr_infrastructure::{
    ActorRepository, CacheFileStore, CandidateStore, JobStore, LibraryRepository,
    MovieRepository, ProviderCacheStore, RefreshLogStore, SettingsReader,
};
use curarr_metadata::{FanartTvClient, TmdbClient};
use curarr_realtime::RealtimeHub;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::bulk::BulkController;
use crate::errors::{WorkflowError, WorkflowResult};

/// Extracts container stream metadata from a media file. The default shells
/// out to ffprobe; tests stub it.
#[async_trait::async_trait]
pub trait StreamProber: Send + Sync {
    async fn probe(&self, path: &Path) -> WorkflowResult<Vec<MediaStream>>;
}

/// Tells a player (or notifier) that a library directory changed. Transport
/// detail lives behind this seam; the engine only issues scan invocations.
#[async_trait::async_trait]
pub trait PlayerNotifier: Send + Sync {
    async fn notify_scan(
        &self,
        player: &str,
        library_id: LibraryId,
        directory: Option<&str>,
    ) -> WorkflowResult<()>;

    async fn notify_message(&self, channel: &str, message: &str) -> WorkflowResult<()>;
}

/// Best-effort ffprobe invocation. Missing binary or unparsable output is an
/// error the verifier downgrades to a warning.
pub struct FfprobeProber;

#[async_trait::async_trait]
impl StreamProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> WorkflowResult<Vec<MediaStream>> {
        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|err| WorkflowError::transient(format!("ffprobe failed to start: {err}")))?;

        if !output.status.success() {
            return Err(WorkflowError::transient(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        let streams = parsed["streams"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|raw| parse_ffprobe_stream(&raw))
            .collect();
        Ok(streams)
    }
}

fn parse_ffprobe_stream(raw: &serde_json::Value) -> Option<MediaStream> {
    use curarr_domain::StreamKind;
    let kind = match raw["codec_type"].as_str()? {
        "video" => StreamKind::Video,
        "audio" => StreamKind::Audio,
        "subtitle" => StreamKind::Subtitle,
        _ => return None,
    };
    let disposition = &raw["disposition"];
    Some(MediaStream {
        kind,
        stream_index: raw["index"].as_i64().unwrap_or(0) as i32,
        codec: raw["codec_name"].as_str().map(str::to_string),
        language: raw["tags"]["language"].as_str().map(str::to_string),
        channels: raw["channels"].as_i64().map(|c| c as i32),
        width: raw["width"].as_i64().map(|w| w as i32),
        height: raw["height"].as_i64().map(|h| h as i32),
        bit_rate: raw["bit_rate"].as_str().and_then(|b| b.parse().ok()),
        is_default: disposition["default"].as_i64() == Some(1),
        is_forced: disposition["forced"].as_i64() == Some(1),
        is_hdr: raw["color_transfer"]
            .as_str()
            .map(|t| t == "smpte2084" || t == "arib-std-b67")
            .unwrap_or(false),
    })
}

/// Default notifier: logs the invocation. Concrete player transports plug in
/// at the binary seam.
pub struct LoggingNotifier;

#[async_trait::async_trait]
impl PlayerNotifier for LoggingNotifier {
    async fn notify_scan(
        &self,
        player: &str,
        library_id: LibraryId,
        directory: Option<&str>,
    ) -> WorkflowResult<()> {
        info!(target: "players", player, library_id = %library_id, ?directory, "scan invocation");
        Ok(())
    }

    async fn notify_message(&self, channel: &str, message: &str) -> WorkflowResult<()> {
        info!(target: "players", channel, message, "notification");
        Ok(())
    }
}

#[derive(Clone)]
pub struct Deps {
    pub config: AppConfig,
    pub libraries: Arc<dyn LibraryRepository>,
    pub movies: Arc<dyn MovieRepository>,
    pub actors: Arc<dyn ActorRepository>,
    pub jobs: Arc<dyn JobStore>,
    pub candidates: Arc<dyn CandidateStore>,
    pub cache_files: Arc<dyn CacheFileStore>,
    pub provider_cache: Arc<dyn ProviderCacheStore>,
    pub refresh_log: Arc<dyn RefreshLogStore>,
    pub settings: SettingsReader,
    pub tmdb: Option<Arc<TmdbClient>>,
    pub fanart: Option<Arc<FanartTvClient>>,
    pub http: reqwest::Client,
    pub hub: Arc<dyn RealtimeHub>,
    pub bulk: Arc<BulkController>,
    pub prober: Arc<dyn StreamProber>,
    pub notifier: Arc<dyn PlayerNotifier>,
}

impl Deps {
    pub fn cache_root(&self) -> &Path {
        Path::new(&self.config.cache.root)
    }

    pub fn trash_root(&self) -> std::path::PathBuf {
        self.cache_root().join("trash")
    }

    /// Download one asset URL into memory, bounded by the provider deadline.
    pub async fn fetch_bytes(&self, url: &str) -> WorkflowResult<Vec<u8>> {
        let deadline =
            std::time::Duration::from_secs(self.config.providers.fetch_timeout_secs);
        let response = tokio::time::timeout(deadline, self.http.get(url).send())
            .await
            .map_err(|_| WorkflowError::transient(format!("download deadline exceeded: {url}")))?
            .map_err(|e| WorkflowError::transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(if status == reqwest::StatusCode::NOT_FOUND {
                WorkflowError::not_found(format!("asset not found: {url}"))
            } else if status.is_server_error() {
                WorkflowError::transient(format!("asset fetch failed with {status}: {url}"))
            } else {
                WorkflowError::validation(format!("asset fetch failed with {status}: {url}"))
            });
        }

        let bytes = tokio::time::timeout(deadline, response.bytes())
            .await
            .map_err(|_| WorkflowError::transient(format!("download deadline exceeded: {url}")))?
            .map_err(|e| WorkflowError::transient(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::Path;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://curarr.db".to_string(),
            pool_max_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5160,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Idle poll floor/ceiling in milliseconds; actual waits are jittered
    /// inside this window.
    pub poll_interval_min_ms: u64,
    pub poll_interval_max_ms: u64,
    /// How long shutdown waits for in-flight handlers before requeueing.
    pub drain_timeout_secs: u64,
    /// Completed/failed rows older than these are purged by cleanup.
    pub completed_retention_days: i64,
    pub failed_retention_days: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_min_ms: 100,
            poll_interval_max_ms: 500,
            drain_timeout_secs: 30,
            completed_retention_days: 30,
            failed_retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_concurrent_requests: usize,
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            max_concurrent_requests: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanartTvConfig {
    pub api_key: Option<String>,
    pub client_key: Option<String>,
    pub base_url: Option<String>,
    pub max_concurrent_requests: usize,
}

impl Default for FanartTvConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            client_key: None,
            base_url: None,
            max_concurrent_requests: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub tmdb: TmdbConfig,
    pub fanarttv: FanartTvConfig,
    /// Per-provider call deadline during orchestrated fan-out.
    pub fetch_timeout_secs: u64,
    /// Merged provider records younger than this are served from cache.
    pub cache_ttl_days: i64,
    pub preferred_language: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            tmdb: TmdbConfig::default(),
            fanarttv: FanartTvConfig::default(),
            fetch_timeout_secs: 20,
            cache_ttl_days: 7,
            preferred_language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root of the on-disk asset cache (`<root>/<kind>/<h0:2>/<hash>.<ext>`).
    pub root: String,
    /// Bounded parallel downloads during enrichment analysis.
    pub analyze_concurrency: usize,
    /// Hamming similarity at or above which a local file matches a candidate.
    pub match_threshold: f64,
    /// Hamming similarity at or above which two candidates are duplicates.
    pub dedup_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: "cache".to_string(),
            analyze_concurrency: 10,
            match_threshold: 0.85,
            dedup_threshold: 0.90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between scheduled library scans. 0 disables the trigger.
    pub file_scan_interval_secs: u64,
    pub provider_update_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub bulk_enrichment_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            file_scan_interval_secs: 12 * 60 * 60,
            provider_update_interval_secs: 24 * 60 * 60,
            cleanup_interval_secs: 24 * 60 * 60,
            bulk_enrichment_interval_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Process-wide allow-list of notification channels. A channel missing
    /// here is never enqueued, even when a library enables it.
    pub enabled: Vec<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: ["kodi", "jellyfin", "plex", "discord", "pushover", "email"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Remote → local path prefix rewrite applied to webhook paths before
/// library resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathMapping {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    pub path_mappings: Vec<PathMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub telemetry: TelemetryConfig,
    pub queue: QueueConfig,
    pub providers: ProvidersConfig,
    pub cache: CacheConfig,
    pub schedule: ScheduleConfig,
    pub webhook: WebhookConfig,
    pub notifications: NotificationsConfig,
}

/// Load configuration from defaults, optional TOML file, and environment
/// overrides (prefix: CURARR_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("CURARR_").split("__"));

    let config: AppConfig = figment.extract()?;
    info!(target: "config", "configuration loaded");
    Ok(config)
}

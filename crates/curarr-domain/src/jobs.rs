// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CandidateId, LibraryId, MovieId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of job types. Identifiers carry no semantics beyond the
/// dispatch table keyed on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    WebhookReceived,
    ScanMovie,
    DiscoverAssets,
    FetchProviderAssets,
    EnrichMetadata,
    SelectAssets,
    Publish,
    VerifyMovie,
    LibraryScan,
    DirectoryScan,
    CacheAsset,
    NotifyKodi,
    NotifyJellyfin,
    NotifyPlex,
    NotifyDiscord,
    NotifyPushover,
    NotifyEmail,
    ScheduledFileScan,
    ScheduledProviderUpdate,
    ScheduledCleanup,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebhookReceived => "webhook-received",
            Self::ScanMovie => "scan-movie",
            Self::DiscoverAssets => "discover-assets",
            Self::FetchProviderAssets => "fetch-provider-assets",
            Self::EnrichMetadata => "enrich-metadata",
            Self::SelectAssets => "select-assets",
            Self::Publish => "publish",
            Self::VerifyMovie => "verify-movie",
            Self::LibraryScan => "library-scan",
            Self::DirectoryScan => "directory-scan",
            Self::CacheAsset => "cache-asset",
            Self::NotifyKodi => "notify-kodi",
            Self::NotifyJellyfin => "notify-jellyfin",
            Self::NotifyPlex => "notify-plex",
            Self::NotifyDiscord => "notify-discord",
            Self::NotifyPushover => "notify-pushover",
            Self::NotifyEmail => "notify-email",
            Self::ScheduledFileScan => "scheduled-file-scan",
            Self::ScheduledProviderUpdate => "scheduled-provider-update",
            Self::ScheduledCleanup => "scheduled-cleanup",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown job type: {s}"))
    }
}

/// 1 = highest, 8 = lowest. 1 is reserved for internal use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobPriority(pub u8);

impl JobPriority {
    pub const HIGH: JobPriority = JobPriority(3);
    pub const NORMAL: JobPriority = JobPriority(5);
    pub const LOW: JobPriority = JobPriority(7);
    pub const SCHEDULED: JobPriority = JobPriority(8);
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Claimed,
    Processing,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Claimed => write!(f, "claimed"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Traceability context threaded through a chain's payloads. There is no
/// cross-job memory; everything else flows via the database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainContext {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmdb_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imdb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_job: Option<i64>,
}

impl ChainContext {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Webhook payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEventType {
    Download,
    Grab,
    Rename,
    Test,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMovie {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub folder_path: Option<String>,
    #[serde(default)]
    pub tmdb_id: Option<i64>,
    #[serde(default)]
    pub imdb_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSeries {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub tvdb_id: Option<i64>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEpisode {
    pub id: i64,
    pub season_number: i32,
    pub episode_number: i32,
    #[serde(default)]
    pub path: Option<String>,
}

/// Provider-agnostic webhook shape accepted from radarr/sonarr/lidarr.
/// Only `Download` events trigger a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub source: String,
    pub event_type: WebhookEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movie: Option<WebhookMovie>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<WebhookSeries>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episodes: Vec<WebhookEpisode>,
}

// ============================================================================
// Job payloads
// ============================================================================

/// One payload variant per job type. Decoding failures are rejected as
/// validation errors at claim time, before the handler runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "kebab-case")]
pub enum JobPayload {
    WebhookReceived {
        payload: WebhookPayload,
    },
    ScanMovie {
        library_id: LibraryId,
        directory: String,
        #[serde(default)]
        chain: ChainContext,
    },
    DiscoverAssets {
        movie_id: MovieId,
        #[serde(default)]
        chain: ChainContext,
    },
    FetchProviderAssets {
        movie_id: MovieId,
        #[serde(default)]
        force_refresh: bool,
        #[serde(default)]
        chain: ChainContext,
    },
    EnrichMetadata {
        movie_id: MovieId,
        #[serde(default)]
        manual: bool,
        #[serde(default)]
        force_refresh: bool,
        /// Set on bulk-run jobs: a rate-limited provider stops the run.
        #[serde(default)]
        require_complete: bool,
        #[serde(default)]
        chain: ChainContext,
    },
    SelectAssets {
        movie_id: MovieId,
        #[serde(default)]
        chain: ChainContext,
    },
    Publish {
        movie_id: MovieId,
        #[serde(default)]
        chain: ChainContext,
    },
    VerifyMovie {
        movie_id: MovieId,
        #[serde(default)]
        chain: ChainContext,
    },
    LibraryScan {
        library_id: LibraryId,
    },
    DirectoryScan {
        library_id: LibraryId,
        directory: String,
        #[serde(default)]
        chain: ChainContext,
    },
    CacheAsset {
        candidate_id: CandidateId,
    },
    NotifyKodi {
        library_id: LibraryId,
        #[serde(default)]
        directory: Option<String>,
    },
    NotifyJellyfin {
        library_id: LibraryId,
        #[serde(default)]
        directory: Option<String>,
    },
    NotifyPlex {
        library_id: LibraryId,
        #[serde(default)]
        directory: Option<String>,
    },
    NotifyDiscord {
        message: String,
    },
    NotifyPushover {
        message: String,
    },
    NotifyEmail {
        subject: String,
        message: String,
    },
    ScheduledFileScan {},
    ScheduledProviderUpdate {},
    ScheduledCleanup {},
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::WebhookReceived { .. } => JobType::WebhookReceived,
            Self::ScanMovie { .. } => JobType::ScanMovie,
            Self::DiscoverAssets { .. } => JobType::DiscoverAssets,
            Self::FetchProviderAssets { .. } => JobType::FetchProviderAssets,
            Self::EnrichMetadata { .. } => JobType::EnrichMetadata,
            Self::SelectAssets { .. } => JobType::SelectAssets,
            Self::Publish { .. } => JobType::Publish,
            Self::VerifyMovie { .. } => JobType::VerifyMovie,
            Self::LibraryScan { .. } => JobType::LibraryScan,
            Self::DirectoryScan { .. } => JobType::DirectoryScan,
            Self::CacheAsset { .. } => JobType::CacheAsset,
            Self::NotifyKodi { .. } => JobType::NotifyKodi,
            Self::NotifyJellyfin { .. } => JobType::NotifyJellyfin,
            Self::NotifyPlex { .. } => JobType::NotifyPlex,
            Self::NotifyDiscord { .. } => JobType::NotifyDiscord,
            Self::NotifyPushover { .. } => JobType::NotifyPushover,
            Self::NotifyEmail { .. } => JobType::NotifyEmail,
            Self::ScheduledFileScan {} => JobType::ScheduledFileScan,
            Self::ScheduledProviderUpdate {} => JobType::ScheduledProviderUpdate,
            Self::ScheduledCleanup {} => JobType::ScheduledCleanup,
        }
    }

    /// The movie this job is scoped to, when it is entity-scoped.
    pub fn movie_id(&self) -> Option<MovieId> {
        match self {
            Self::DiscoverAssets { movie_id, .. }
            | Self::FetchProviderAssets { movie_id, .. }
            | Self::EnrichMetadata { movie_id, .. }
            | Self::SelectAssets { movie_id, .. }
            | Self::Publish { movie_id, .. }
            | Self::VerifyMovie { movie_id, .. } => Some(*movie_id),
            _ => None,
        }
    }
}

// ============================================================================
// Job rows
// ============================================================================

/// What a caller supplies when enqueuing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub payload: JobPayload,
    pub priority: JobPriority,
    pub max_retries: u32,
    /// Future-dated for delayed jobs; `None` means ready now.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub parent_job_id: Option<JobId>,
}

impl JobSpec {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            payload,
            priority: JobPriority::NORMAL,
            max_retries: 3,
            scheduled_at: None,
            parent_job_id: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parent(mut self, parent: JobId) -> Self {
        self.parent_job_id = Some(parent);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn delayed_until(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// A queued job row as stored. The payload column is raw JSON; decode happens
/// at claim time so bad rows fail before entering a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub scheduled_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub parent_job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn decode_payload(&self) -> Result<JobPayload, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Counts per state, published as `jobQueueStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQueueStats {
    pub pending: u64,
    pub claimed: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub retrying: u64,
    pub cancelled: u64,
}

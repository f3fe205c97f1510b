// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod assets;
pub mod jobs;

pub use assets::{
    AssetCandidate, AssetKind, AssetSource, CacheFile, CandidateId, CacheFileId, CastCredit,
    MetadataRecord, ProviderImage, ProviderVideo, RatingEntry, RefreshLogEntry, SelectedBy,
};
pub use jobs::{
    ChainContext, Job, JobId, JobPayload, JobPriority, JobQueueStats, JobSpec, JobState,
    JobType, WebhookEpisode, WebhookEventType, WebhookMovie, WebhookPayload, WebhookSeries,
};

// ============================================================================
// Value Objects & IDs
// ============================================================================

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl $name {
            pub fn as_i64(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(LibraryId);
entity_id!(MovieId);
entity_id!(SeriesId);
entity_id!(SeasonId);
entity_id!(EpisodeId);
entity_id!(ActorId);

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Movie,
    Series,
    Season,
    Episode,
    Actor,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Movie => write!(f, "movie"),
            Self::Series => write!(f, "series"),
            Self::Season => write!(f, "season"),
            Self::Episode => write!(f, "episode"),
            Self::Actor => write!(f, "actor"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(Self::Movie),
            "series" => Ok(Self::Series),
            "season" => Ok(Self::Season),
            "episode" => Ok(Self::Episode),
            "actor" => Ok(Self::Actor),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// A (kind, id) pair identifying any tracked entity. Candidate and cache-file
/// rows key on this instead of holding typed foreign keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn movie(id: MovieId) -> Self {
        Self {
            kind: EntityKind::Movie,
            id: id.0,
        }
    }

    pub fn actor(id: ActorId) -> Self {
        Self {
            kind: EntityKind::Actor,
            id: id.0,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    Movie,
    Series,
    Music,
}

impl std::fmt::Display for LibraryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Movie => write!(f, "movie"),
            Self::Series => write!(f, "series"),
            Self::Music => write!(f, "music"),
        }
    }
}

/// How far automation is allowed to go for a library without user sign-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationMode {
    /// Nothing happens without an explicit user action.
    Manual,
    /// Select and publish without approval.
    Yolo,
    /// Auto-select, wait for the user to publish.
    Hybrid,
}

impl std::fmt::Display for AutomationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Yolo => write!(f, "yolo"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for AutomationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "yolo" => Ok(Self::Yolo),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown automation mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentificationStatus {
    Discovered,
    Identified,
    Enriched,
    Failed,
}

impl std::fmt::Display for IdentificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "discovered"),
            Self::Identified => write!(f, "identified"),
            Self::Enriched => write!(f, "enriched"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for IdentificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "identified" => Ok(Self::Identified),
            "enriched" => Ok(Self::Enriched),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown identification status: {other}")),
        }
    }
}

/// External metadata providers, ordered by merge priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Tmdb,
    #[serde(rename = "fanart.tv")]
    FanartTv,
    Tvdb,
}

impl Provider {
    /// Scalar merge priority, lower wins.
    pub fn merge_rank(self) -> u8 {
        match self {
            Self::Tmdb => 0,
            Self::FanartTv => 1,
            Self::Tvdb => 2,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tmdb => write!(f, "tmdb"),
            Self::FanartTv => write!(f, "fanart.tv"),
            Self::Tvdb => write!(f, "tvdb"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tmdb" => Ok(Self::Tmdb),
            "fanart.tv" | "fanarttv" => Ok(Self::FanartTv),
            "tvdb" => Ok(Self::Tvdb),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Notification targets a library can enable: players get scan invocations,
/// the message channels get human-readable notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    Kodi,
    Jellyfin,
    Plex,
    Discord,
    Pushover,
    Email,
}

impl NotifierKind {
    pub const ALL: [NotifierKind; 6] = [
        NotifierKind::Kodi,
        NotifierKind::Jellyfin,
        NotifierKind::Plex,
        NotifierKind::Discord,
        NotifierKind::Pushover,
        NotifierKind::Email,
    ];

    /// Players rescan directories; everything else receives messages.
    pub fn is_player(self) -> bool {
        matches!(self, Self::Kodi | Self::Jellyfin | Self::Plex)
    }
}

impl std::fmt::Display for NotifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kodi => write!(f, "kodi"),
            Self::Jellyfin => write!(f, "jellyfin"),
            Self::Plex => write!(f, "plex"),
            Self::Discord => write!(f, "discord"),
            Self::Pushover => write!(f, "pushover"),
            Self::Email => write!(f, "email"),
        }
    }
}

impl std::str::FromStr for NotifierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kodi" => Ok(Self::Kodi),
            "jellyfin" => Ok(Self::Jellyfin),
            "plex" => Ok(Self::Plex),
            "discord" => Ok(Self::Discord),
            "pushover" => Ok(Self::Pushover),
            "email" => Ok(Self::Email),
            other => Err(format!("unknown notifier: {other}")),
        }
    }
}

/// User-editable movie scalars that can be locked against automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarField {
    Title,
    OriginalTitle,
    SortTitle,
    Year,
    Plot,
    Outline,
    Tagline,
    Runtime,
    ContentRating,
    Premiered,
}

// ============================================================================
// Aggregates
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    pub root_path: String,
    pub kind: LibraryKind,
    pub enabled: bool,
    pub automation: AutomationMode,
    pub auto_scan: bool,
    pub auto_identify: bool,
    pub auto_enrich: bool,
    pub auto_publish: bool,
    /// Enabled notification targets; each fan-out enqueues one notify job
    /// per entry.
    pub notifiers: Vec<NotifierKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Library {
    /// Whether the given path falls under this library's root.
    pub fn contains(&self, path: &str) -> bool {
        let root = self.root_path.trim_end_matches('/');
        path == root || path.starts_with(&format!("{root}/"))
    }
}

/// Resolve a path to the owning library: longest matching root wins.
pub fn resolve_library<'a>(libraries: &'a [Library], path: &str) -> Option<&'a Library> {
    libraries
        .iter()
        .filter(|lib| lib.enabled && lib.contains(path))
        .max_by_key(|lib| lib.root_path.trim_end_matches('/').len())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovieCollection {
    pub tmdb_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub overview: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movie {
    pub id: MovieId,
    pub library_id: LibraryId,
    pub title: String,
    pub original_title: Option<String>,
    pub sort_title: Option<String>,
    pub year: Option<i32>,
    pub plot: Option<String>,
    pub outline: Option<String>,
    pub tagline: Option<String>,
    /// Minutes.
    pub runtime: Option<i32>,
    pub content_rating: Option<String>,
    pub premiered: Option<String>,
    pub genres: Vec<String>,
    pub directors: Vec<String>,
    pub writers: Vec<String>,
    pub studios: Vec<String>,
    pub countries: Vec<String>,
    pub tags: Vec<String>,
    pub ratings: Vec<RatingEntry>,
    pub collection: Option<MovieCollection>,
    pub tmdb_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub monitored: bool,
    pub identification_status: IdentificationStatus,
    pub enriched_at: Option<DateTime<Utc>>,
    pub directory: String,
    pub video_file: Option<String>,
    pub video_hash: Option<String>,
    pub locked_fields: Vec<ScalarField>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Movie {
    pub fn is_locked(&self, field: ScalarField) -> bool {
        self.locked_fields.contains(&field)
    }

    /// Kodi naming base, `Title (Year)`, falling back to the bare title.
    pub fn file_base(&self) -> String {
        match self.year {
            Some(year) => format!("{} ({year})", self.title),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub id: SeriesId,
    pub library_id: LibraryId,
    pub title: String,
    pub year: Option<i32>,
    pub plot: Option<String>,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub monitored: bool,
    pub identification_status: IdentificationStatus,
    pub enriched_at: Option<DateTime<Utc>>,
    pub directory: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Season {
    pub id: SeasonId,
    pub series_id: SeriesId,
    pub season_number: i32,
    pub monitored: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub series_id: SeriesId,
    pub season_number: i32,
    pub episode_number: i32,
    pub title: Option<String>,
    pub plot: Option<String>,
    pub aired: Option<String>,
    pub monitored: bool,
    pub identification_status: IdentificationStatus,
    pub video_file: Option<String>,
    pub video_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub name_locked: bool,
    pub tmdb_person_id: Option<i64>,
    pub thumb_url: Option<String>,
    pub image_hash: Option<String>,
    pub image_cache_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cast link row between a movie and an actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastMember {
    pub actor_id: ActorId,
    pub name: String,
    pub role: Option<String>,
    pub sort_order: i32,
    pub thumb_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Subtitle => write!(f, "subtitle"),
        }
    }
}

impl std::str::FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "subtitle" => Ok(Self::Subtitle),
            other => Err(format!("unknown stream kind: {other}")),
        }
    }
}

/// One container track, re-extracted whenever the video hash changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaStream {
    pub kind: StreamKind,
    pub stream_index: i32,
    pub codec: Option<String>,
    pub language: Option<String>,
    pub channels: Option<i32>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub bit_rate: Option<i64>,
    pub is_default: bool,
    pub is_forced: bool,
    pub is_hdr: bool,
}

// ============================================================================
// Runtime settings
// ============================================================================

/// Chain-boundary gates, read from settings on every routing decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkflowToggles {
    pub webhooks: bool,
    pub scanning: bool,
    pub identification: bool,
    pub enrichment: bool,
    pub publishing: bool,
}

impl Default for WorkflowToggles {
    fn default() -> Self {
        Self {
            webhooks: true,
            scanning: true,
            identification: true,
            enrichment: true,
            publishing: true,
        }
    }
}

/// Per-asset-kind selection limits and lock flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionPolicy {
    pub max_posters: u32,
    pub max_backdrops: u32,
    pub max_logos: u32,
    pub max_banners: u32,
    pub max_landscapes: u32,
    pub max_trailers: u32,
    pub locked_kinds: Vec<AssetKind>,
}

impl SelectionPolicy {
    pub fn limit(&self, kind: AssetKind) -> u32 {
        match kind {
            AssetKind::Poster => self.max_posters,
            AssetKind::Backdrop => self.max_backdrops,
            AssetKind::Logo => self.max_logos,
            AssetKind::Banner => self.max_banners,
            AssetKind::Landscape => self.max_landscapes,
            AssetKind::Trailer => self.max_trailers,
            AssetKind::Thumb => 1,
        }
    }

    pub fn is_locked(&self, kind: AssetKind) -> bool {
        self.locked_kinds.contains(&kind)
    }
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            max_posters: 1,
            max_backdrops: 1,
            max_logos: 1,
            max_banners: 1,
            max_landscapes: 1,
            max_trailers: 1,
            locked_kinds: Vec::new(),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Envelope published to realtime subscribers. Every message carries its
/// `type` and an ISO-8601 timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

impl DomainEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

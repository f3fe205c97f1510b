// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Result;
use chrono::{DateTime, Utc};
use curarr_domain::{
    Actor, ActorId, AssetCandidate, AssetKind, AssetSource, CacheFile, CacheFileId, CandidateId,
    CastMember, EntityKind, EntityRef, IdentificationStatus, Job, JobId, JobQueueStats, JobSpec,
    Library, LibraryId, MediaStream, MetadataRecord, Movie, MovieId, Provider, RefreshLogEntry,
    SelectedBy,
};
use std::sync::Arc;

#[async_trait::async_trait]
pub trait LibraryRepository: Send + Sync {
    async fn create(&self, library: Library) -> Result<Library>;
    async fn get_by_id(&self, id: LibraryId) -> Result<Option<Library>>;
    async fn list(&self) -> Result<Vec<Library>>;
    async fn list_enabled(&self) -> Result<Vec<Library>>;
    async fn update(&self, library: Library) -> Result<Library>;
}

/// New-movie input: everything except the generated id and timestamps.
#[derive(Debug, Clone)]
pub struct NewMovie {
    pub library_id: LibraryId,
    pub title: String,
    pub year: Option<i32>,
    pub tmdb_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub directory: String,
    pub video_file: Option<String>,
    pub video_hash: Option<String>,
    pub identification_status: IdentificationStatus,
}

#[async_trait::async_trait]
pub trait MovieRepository: Send + Sync {
    async fn insert(&self, movie: NewMovie) -> Result<Movie>;
    async fn get_by_id(&self, id: MovieId) -> Result<Option<Movie>>;
    async fn get_by_tmdb_id(&self, tmdb_id: i64) -> Result<Option<Movie>>;
    async fn get_by_directory(&self, directory: &str) -> Result<Option<Movie>>;
    async fn update(&self, movie: Movie) -> Result<Movie>;
    /// Monitored movie ids in ascending id order, for bulk runs.
    async fn list_monitored_ids(&self) -> Result<Vec<MovieId>>;
    async fn set_identification_status(
        &self,
        id: MovieId,
        status: IdentificationStatus,
    ) -> Result<()>;
    async fn stamp_enriched(&self, id: MovieId, at: DateTime<Utc>) -> Result<()>;
    async fn update_video(&self, id: MovieId, file: Option<&str>, hash: Option<&str>)
        -> Result<()>;
    async fn replace_cast(&self, id: MovieId, cast: &[(ActorId, Option<String>, i32)])
        -> Result<()>;
    async fn get_cast(&self, id: MovieId) -> Result<Vec<CastMember>>;
    async fn replace_streams(&self, id: MovieId, streams: &[MediaStream]) -> Result<()>;
    async fn get_streams(&self, id: MovieId) -> Result<Vec<MediaStream>>;
}

#[async_trait::async_trait]
pub trait ActorRepository: Send + Sync {
    /// Insert or update by TMDB person id. The stored name wins when
    /// `name_locked` is set.
    async fn upsert_by_person_id(
        &self,
        person_id: i64,
        name: &str,
        thumb_url: Option<&str>,
    ) -> Result<Actor>;
    async fn get_by_id(&self, id: ActorId) -> Result<Option<Actor>>;
    async fn update_image(
        &self,
        id: ActorId,
        image_hash: &str,
        image_cache_path: &str,
    ) -> Result<()>;
}

/// Durable priority queue over the `jobs` table.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, spec: JobSpec) -> Result<Job>;
    /// Insert unless an active (pending/claimed/processing/retrying) job of
    /// the same type already exists for the same movie. Returns `None` when
    /// suppressed.
    async fn insert_unless_active(&self, spec: JobSpec) -> Result<Option<Job>>;
    /// Atomically claim up to `max` ready jobs, ordered by (priority,
    /// scheduled_at, id). Safe under concurrent claimers.
    async fn claim(&self, worker_id: &str, max: u32) -> Result<Vec<Job>>;
    /// Stamp the claimed → processing transition for the claiming worker.
    async fn mark_processing(&self, id: JobId, worker_id: &str) -> Result<()>;
    async fn complete(&self, id: JobId) -> Result<()>;
    /// Transient failures below the retry cap go to `retrying` with
    /// exponential backoff (or the caller-supplied delay, e.g. a provider's
    /// Retry-After); everything else is terminal `failed`.
    async fn fail(
        &self,
        id: JobId,
        error: &str,
        transient: bool,
        retry_delay: Option<chrono::Duration>,
    ) -> Result<Job>;
    async fn cancel(&self, id: JobId) -> Result<()>;
    /// Cancel every pending/retrying bulk enrichment job (payloads with
    /// `require_complete`). Used when a rate limit stops a bulk run.
    async fn cancel_pending_bulk_enrichment(&self) -> Result<u64>;
    /// Put a claimed/processing job back to pending (shutdown requeue).
    async fn requeue(&self, id: JobId) -> Result<()>;
    async fn get(&self, id: JobId) -> Result<Option<Job>>;
    async fn has_active(&self, job_type: curarr_domain::JobType) -> Result<bool>;
    async fn cleanup(
        &self,
        completed_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<u64>;
    async fn stats(&self) -> Result<JobQueueStats>;
    /// Wakes worker claim loops; signalled on every successful insert.
    fn notifier(&self) -> Arc<tokio::sync::Notify>;
}

/// Cached merged provider responses, 7-day TTL.
#[async_trait::async_trait]
pub trait ProviderCacheStore: Send + Sync {
    async fn get(
        &self,
        entity_kind: EntityKind,
        provider_key: &str,
    ) -> Result<Option<(MetadataRecord, DateTime<Utc>)>>;
    /// Replace the record and its image child rows atomically.
    async fn put(
        &self,
        entity_kind: EntityKind,
        provider_key: &str,
        record: &MetadataRecord,
        fetched_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Analysis results written back to a candidate in one update.
#[derive(Debug, Clone, Default)]
pub struct CandidateAnalysis {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub content_hash: Option<String>,
    pub perceptual_hash: Option<u64>,
    pub difference_hash: Option<u64>,
    pub alpha_ratio: Option<f64>,
    pub format: Option<String>,
}

/// Candidate fields refreshed from provider metadata on upsert.
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub entity: EntityRef,
    pub kind: AssetKind,
    pub provider: Provider,
    pub url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub vote_average: Option<f64>,
    pub vote_count: Option<i64>,
    pub language: Option<String>,
}

#[async_trait::async_trait]
pub trait CandidateStore: Send + Sync {
    /// Insert a candidate keyed by (entity, url). When the row exists,
    /// metadata is refreshed only if `update_existing` is set (manual runs).
    async fn upsert(&self, candidate: NewCandidate, update_existing: bool) -> Result<CandidateId>;
    async fn get(&self, id: CandidateId) -> Result<Option<AssetCandidate>>;
    async fn list_for_entity(
        &self,
        entity: EntityRef,
        kind: Option<AssetKind>,
    ) -> Result<Vec<AssetCandidate>>;
    async fn record_analysis(&self, id: CandidateId, analysis: &CandidateAnalysis) -> Result<()>;
    async fn set_score(&self, id: CandidateId, score: i32) -> Result<()>;
    async fn mark_downloaded(&self, id: CandidateId, content_hash: &str) -> Result<()>;
    /// Swap the selected set for (entity, kind): clear all, then mark the
    /// given ids, in one transaction.
    async fn swap_selected(
        &self,
        entity: EntityRef,
        kind: AssetKind,
        selected: &[CandidateId],
        selected_by: SelectedBy,
        at: DateTime<Utc>,
    ) -> Result<()>;
    async fn selected_ids(&self, entity: EntityRef, kind: AssetKind) -> Result<Vec<CandidateId>>;
}

#[async_trait::async_trait]
pub trait CacheFileStore: Send + Sync {
    async fn insert(&self, file: CacheFile) -> Result<CacheFile>;
    async fn get_by_hash(&self, entity: EntityRef, content_hash: &str)
        -> Result<Option<CacheFile>>;
    async fn list_for_entity(
        &self,
        entity: EntityRef,
        kind: Option<AssetKind>,
    ) -> Result<Vec<CacheFile>>;
    async fn set_perceptual_hash(&self, id: CacheFileId, hash: u64) -> Result<()>;
    async fn link_provider(
        &self,
        id: CacheFileId,
        provider: Provider,
        source_url: &str,
    ) -> Result<()>;
    /// Move a row to a new on-disk location and source. Used when a
    /// scanned-in placeholder is promoted into the canonical cache.
    async fn relocate(
        &self,
        id: CacheFileId,
        new_path: &str,
        new_source: AssetSource,
    ) -> Result<()>;
    async fn delete(&self, id: CacheFileId) -> Result<()>;
    /// Local placeholder rows for (entity, kind), superseded by selections.
    async fn list_local_for(&self, entity: EntityRef, kind: AssetKind) -> Result<Vec<CacheFile>>;
    /// Provider-sourced rows whose content hash no candidate references as a
    /// selected asset any more.
    async fn list_orphans(&self) -> Result<Vec<CacheFile>>;
}

#[async_trait::async_trait]
pub trait RefreshLogStore: Send + Sync {
    async fn upsert(&self, entry: RefreshLogEntry) -> Result<()>;
    async fn get(
        &self,
        entity_kind: EntityKind,
        entity_id: i64,
        provider: Provider,
    ) -> Result<Option<RefreshLogEntry>>;
    /// Entities last checked before the cutoff, or flagged `needs_refresh`.
    async fn stale_entities(
        &self,
        entity_kind: EntityKind,
        checked_before: DateTime<Utc>,
    ) -> Result<Vec<i64>>;
}

#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;
    async fn set_raw(&self, key: &str, value: &str) -> Result<()>;
}

// SPDX-License-Identifier: GPL-3.0-or-later
//! The five-phase enrichment pipeline for one entity. Every phase is
//! resumable: re-running after a crash converges on the same state because
//! all progress lives in candidate and cache-file rows.

use chrono::Utc;
use curarr_domain::{
    AssetCandidate, AssetKind, AssetSource, CacheFile, CacheFileId, CandidateId, EntityRef,
    IdentificationStatus, Movie, MovieId, Provider, ScalarField, SelectedBy,
};
use curarr_imaging::{analyze_image, hamming_similarity};
use curarr_infrastructure::repositories::{CandidateAnalysis, NewCandidate};
use futures_util::StreamExt;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::deps::Deps;
use crate::enrichment::score::score_candidate;
use crate::errors::{WorkflowError, WorkflowResult};
use crate::events;
use crate::naming::{actor_cache_path, analyze_temp_path, asset_cache_path, url_extension};
use crate::orchestrator::{fetch_movie_metadata, FetchOptions};

#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichmentOptions {
    /// Manual runs refresh existing candidate metadata; automated runs leave
    /// existing rows untouched.
    pub manual: bool,
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseCounts {
    pub images_discovered: usize,
    pub cast_linked: usize,
    pub cache_matched: usize,
    pub analyzed: usize,
    pub analysis_failures: usize,
    pub scored: usize,
    pub selected: usize,
}

pub struct EnrichmentPipeline<'a> {
    deps: &'a Deps,
}

impl<'a> EnrichmentPipeline<'a> {
    pub fn new(deps: &'a Deps) -> Self {
        Self { deps }
    }

    /// Phases 1–4: provider fetch, cache matching, analysis, scoring.
    pub async fn run_metadata_phases(
        &self,
        movie_id: MovieId,
        options: EnrichmentOptions,
    ) -> WorkflowResult<PhaseCounts> {
        let mut counts = PhaseCounts::default();
        self.deps.hub.publish(events::enrichment_started(movie_id));

        self.phase1_fetch(movie_id, options, &mut counts).await?;
        self.deps.hub.publish(events::enrichment_phase_complete(
            movie_id,
            1,
            json!({ "images": counts.images_discovered, "cast": counts.cast_linked }),
        ));

        self.phase2_match_cache(movie_id, &mut counts).await?;
        self.deps.hub.publish(events::enrichment_phase_complete(
            movie_id,
            2,
            json!({ "matched": counts.cache_matched }),
        ));

        self.phase3_analyze(movie_id, &mut counts).await?;
        self.deps.hub.publish(events::enrichment_phase_complete(
            movie_id,
            3,
            json!({ "analyzed": counts.analyzed, "failures": counts.analysis_failures }),
        ));

        self.phase4_score(movie_id, &mut counts).await?;
        self.deps.hub.publish(events::enrichment_phase_complete(
            movie_id,
            4,
            json!({ "scored": counts.scored }),
        ));

        Ok(counts)
    }

    /// Phase 5 and 5C: selection, cache materialization, actor thumbnails.
    /// Stamps the entity enriched and broadcasts completion.
    pub async fn run_selection(&self, movie_id: MovieId) -> WorkflowResult<usize> {
        let movie = self.load_movie(movie_id).await?;
        let entity = EntityRef::movie(movie_id);
        let policy = self.deps.settings.selection_policy().await?;
        let threshold = self.deps.config.cache.dedup_threshold;
        let mut total_selected = 0usize;

        for kind in AssetKind::ALL {
            if policy.is_locked(kind) {
                debug!(target: "enrichment", movie_id = %movie_id, asset_kind = %kind, "selection locked, skipping");
                continue;
            }
            total_selected += self
                .select_kind(entity, kind, policy.limit(kind) as usize, threshold)
                .await?;
        }

        self.phase5c_actor_thumbs(&movie).await;

        self.deps.movies.stamp_enriched(movie_id, Utc::now()).await?;
        self.deps.hub.publish(events::enrichment_phase_complete(
            movie_id,
            5,
            json!({ "selected": total_selected }),
        ));
        self.deps
            .hub
            .publish(events::enrichment_complete(movie_id, total_selected));
        info!(target: "enrichment", movie_id = %movie_id, selected = total_selected, "enrichment complete");
        Ok(total_selected)
    }

    /// Materialize a single candidate on demand (the cache-asset job).
    pub async fn cache_candidate(&self, id: CandidateId) -> WorkflowResult<()> {
        let candidate = self
            .deps
            .candidates
            .get(id)
            .await?
            .ok_or_else(|| WorkflowError::validation(format!("candidate not found: {id}")))?;

        let content_hash = match candidate.content_hash.clone() {
            Some(hash) => hash,
            None => {
                let analysis = self.analyze_candidate(&candidate).await?;
                self.deps.candidates.record_analysis(id, &analysis).await?;
                analysis
                    .content_hash
                    .ok_or_else(|| WorkflowError::fatal("analysis produced no content hash"))?
            }
        };

        if self
            .deps
            .cache_files
            .get_by_hash(candidate.entity, &content_hash)
            .await?
            .is_some()
        {
            return Ok(());
        }
        let candidate = self
            .deps
            .candidates
            .get(id)
            .await?
            .ok_or_else(|| WorkflowError::validation(format!("candidate not found: {id}")))?;
        self.materialize_candidate(&candidate, &content_hash).await
    }

    async fn load_movie(&self, movie_id: MovieId) -> WorkflowResult<Movie> {
        self.deps
            .movies
            .get_by_id(movie_id)
            .await?
            .ok_or_else(|| WorkflowError::validation(format!("movie not found: {movie_id}")))
    }

    // ------------------------------------------------------------------
    // Phase 1 — fetch provider metadata
    // ------------------------------------------------------------------

    async fn phase1_fetch(
        &self,
        movie_id: MovieId,
        options: EnrichmentOptions,
        counts: &mut PhaseCounts,
    ) -> WorkflowResult<()> {
        let mut movie = self.load_movie(movie_id).await?;
        let tmdb_id = movie
            .tmdb_id
            .ok_or_else(|| WorkflowError::validation("cannot enrich without a tmdb id"))?;

        let outcome = fetch_movie_metadata(
            self.deps,
            tmdb_id,
            &FetchOptions {
                force_refresh: options.force_refresh,
            },
        )
        .await?;

        let Some(record) = outcome.record else {
            warn!(target: "enrichment", movie_id = %movie_id, "no provider data, skipping metadata copy");
            return Ok(());
        };

        // Scalars, honoring per-field locks.
        let set_if_unlocked = |locked: bool, target: &mut Option<String>, value: Option<String>| {
            if !locked {
                if let Some(value) = value {
                    *target = Some(value);
                }
            }
        };
        if !movie.is_locked(ScalarField::Title) {
            if let Some(title) = record.title.clone() {
                movie.title = title;
            }
        }
        let original_locked = movie.is_locked(ScalarField::OriginalTitle);
        set_if_unlocked(
            original_locked,
            &mut movie.original_title,
            record.original_title.clone(),
        );
        if !movie.is_locked(ScalarField::Year) {
            if let Some(year) = record.year {
                movie.year = Some(year);
            }
        }
        let plot_locked = movie.is_locked(ScalarField::Plot);
        set_if_unlocked(plot_locked, &mut movie.plot, record.plot.clone());
        let tagline_locked = movie.is_locked(ScalarField::Tagline);
        set_if_unlocked(tagline_locked, &mut movie.tagline, record.tagline.clone());
        if !movie.is_locked(ScalarField::Runtime) {
            if let Some(runtime) = record.runtime {
                movie.runtime = Some(runtime);
            }
        }
        let rating_locked = movie.is_locked(ScalarField::ContentRating);
        set_if_unlocked(
            rating_locked,
            &mut movie.content_rating,
            record.content_rating.clone(),
        );
        let premiered_locked = movie.is_locked(ScalarField::Premiered);
        set_if_unlocked(
            premiered_locked,
            &mut movie.premiered,
            record.premiered.clone(),
        );

        if movie.imdb_id.is_none() {
            movie.imdb_id = record.imdb_id.clone();
        }
        if !record.genres.is_empty() {
            movie.genres = record.genres.clone();
        }
        if !record.studios.is_empty() {
            movie.studios = record.studios.clone();
        }
        if !record.countries.is_empty() {
            movie.countries = record.countries.clone();
        }
        for rating in &record.ratings {
            match movie.ratings.iter_mut().find(|r| r.source == rating.source) {
                Some(existing) => *existing = rating.clone(),
                None => movie.ratings.push(rating.clone()),
            }
        }
        if let Some(name) = record.collection_name.clone() {
            movie.collection = Some(curarr_domain::MovieCollection {
                tmdb_id: record.collection_tmdb_id,
                name,
                overview: record.collection_overview.clone(),
            });
        }
        if movie.identification_status == IdentificationStatus::Discovered {
            movie.identification_status = IdentificationStatus::Identified;
        }
        self.deps.movies.update(movie.clone()).await?;

        // Cast: upsert actors by provider person id, then replace the link
        // table wholesale.
        let mut cast_sorted = record.cast.clone();
        cast_sorted.sort_by_key(|c| c.sort_order);
        let mut links = Vec::with_capacity(cast_sorted.len());
        for credit in &cast_sorted {
            let actor = self
                .deps
                .actors
                .upsert_by_person_id(credit.person_id, &credit.name, credit.profile_url.as_deref())
                .await?;
            links.push((actor.id, credit.role.clone(), credit.sort_order));
        }
        self.deps.movies.replace_cast(movie_id, &links).await?;
        counts.cast_linked = links.len();

        // Candidates, keyed by absolute URL. Unmapped provider types skip.
        let entity = EntityRef::movie(movie_id);
        for image in &record.images {
            let Some(kind) = AssetKind::from_provider_type(&image.image_type) else {
                continue;
            };
            self.deps
                .candidates
                .upsert(
                    NewCandidate {
                        entity,
                        kind,
                        provider: image.provider,
                        url: image.url.clone(),
                        width: image.width,
                        height: image.height,
                        vote_average: image.vote_average,
                        vote_count: image.vote_count,
                        language: image.language.clone(),
                    },
                    options.manual,
                )
                .await?;
            counts.images_discovered += 1;
        }
        for video in &record.videos {
            self.deps
                .candidates
                .upsert(
                    NewCandidate {
                        entity,
                        kind: AssetKind::Trailer,
                        provider: video.provider,
                        url: video.url.clone(),
                        width: None,
                        height: None,
                        vote_average: None,
                        vote_count: None,
                        language: video.language.clone(),
                    },
                    options.manual,
                )
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 2 — match existing cache files to candidates
    // ------------------------------------------------------------------

    async fn phase2_match_cache(
        &self,
        movie_id: MovieId,
        counts: &mut PhaseCounts,
    ) -> WorkflowResult<()> {
        let entity = EntityRef::movie(movie_id);
        let threshold = self.deps.config.cache.match_threshold;
        let mut files = self.deps.cache_files.list_for_entity(entity, None).await?;

        // Opportunistic backfill for cache rows predating perceptual hashing.
        for file in files.iter_mut().filter(|f| f.perceptual_hash.is_none()) {
            match std::fs::read(&file.file_path) {
                Ok(bytes) => match analyze_image(&bytes) {
                    Ok(analysis) => {
                        self.deps
                            .cache_files
                            .set_perceptual_hash(file.id, analysis.perceptual_hash)
                            .await?;
                        file.perceptual_hash = Some(analysis.perceptual_hash);
                    }
                    Err(err) => {
                        debug!(target: "enrichment", path = %file.file_path, error = %err, "phash backfill failed");
                    }
                },
                Err(err) => {
                    debug!(target: "enrichment", path = %file.file_path, error = %err, "cache file unreadable");
                }
            }
        }

        let candidates = self.deps.candidates.list_for_entity(entity, None).await?;
        for file in files.iter().filter(|f| f.perceptual_hash.is_some()) {
            let file_hash = file.perceptual_hash.expect("filtered above");
            for candidate in candidates
                .iter()
                .filter(|c| c.kind == file.kind && !c.is_downloaded)
            {
                let Some(candidate_hash) = candidate.perceptual_hash else {
                    continue;
                };
                if hamming_similarity(file_hash, candidate_hash) >= threshold {
                    self.deps
                        .candidates
                        .mark_downloaded(candidate.id, &file.content_hash)
                        .await?;
                    self.deps
                        .cache_files
                        .link_provider(file.id, candidate.provider, &candidate.url)
                        .await?;
                    counts.cache_matched += 1;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 3 — analyze
    // ------------------------------------------------------------------

    async fn phase3_analyze(
        &self,
        movie_id: MovieId,
        counts: &mut PhaseCounts,
    ) -> WorkflowResult<()> {
        let entity = EntityRef::movie(movie_id);
        let pending: Vec<AssetCandidate> = self
            .deps
            .candidates
            .list_for_entity(entity, None)
            .await?
            .into_iter()
            .filter(|c| !c.analyzed && c.kind != AssetKind::Trailer)
            .collect();

        let concurrency = self.deps.config.cache.analyze_concurrency.max(1);
        let results: Vec<(CandidateId, WorkflowResult<CandidateAnalysis>)> =
            futures_util::stream::iter(pending.into_iter().map(|candidate| async move {
                let id = candidate.id;
                (id, self.analyze_candidate(&candidate).await)
            }))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(analysis) => {
                    self.deps.candidates.record_analysis(id, &analysis).await?;
                    counts.analyzed += 1;
                }
                Err(err) => {
                    // A single bad asset never fails the phase.
                    warn!(target: "enrichment", candidate = %id, error = %err, "analysis skipped");
                    counts.analysis_failures += 1;
                }
            }
        }
        Ok(())
    }

    async fn analyze_candidate(
        &self,
        candidate: &AssetCandidate,
    ) -> WorkflowResult<CandidateAnalysis> {
        let bytes = self.deps.fetch_bytes(&candidate.url).await?;

        // Spill to the process-private temp dir during decoding so partial
        // downloads never land anywhere permanent; removed on every path.
        let temp = analyze_temp_path(self.deps.cache_root(), &candidate.id.to_string());
        if let Some(parent) = temp.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&temp, &bytes).await?;
        let analysis = analyze_image(&bytes);
        let _ = tokio::fs::remove_file(&temp).await;

        let analysis =
            analysis.map_err(|err| WorkflowError::validation(format!("undecodable image: {err}")))?;
        Ok(CandidateAnalysis {
            width: Some(analysis.width as i32),
            height: Some(analysis.height as i32),
            content_hash: Some(analysis.content_hash),
            perceptual_hash: Some(analysis.perceptual_hash),
            difference_hash: Some(analysis.difference_hash),
            alpha_ratio: Some(analysis.alpha_ratio),
            format: Some(analysis.format),
        })
    }

    // ------------------------------------------------------------------
    // Phase 4 — score
    // ------------------------------------------------------------------

    async fn phase4_score(
        &self,
        movie_id: MovieId,
        counts: &mut PhaseCounts,
    ) -> WorkflowResult<()> {
        let entity = EntityRef::movie(movie_id);
        let language = &self.deps.config.providers.preferred_language;
        for candidate in self
            .deps
            .candidates
            .list_for_entity(entity, None)
            .await?
            .iter()
            .filter(|c| c.analyzed || c.kind == AssetKind::Trailer)
        {
            let score = score_candidate(candidate, language);
            self.deps.candidates.set_score(candidate.id, score).await?;
            counts.scored += 1;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 5 — select
    // ------------------------------------------------------------------

    async fn select_kind(
        &self,
        entity: EntityRef,
        kind: AssetKind,
        limit: usize,
        threshold: f64,
    ) -> WorkflowResult<usize> {
        let candidates = self.deps.candidates.list_for_entity(entity, Some(kind)).await?;
        let new_selection = select_top_unique(&candidates, limit, threshold);

        let previous: BTreeSet<CandidateId> = self
            .deps
            .candidates
            .selected_ids(entity, kind)
            .await?
            .into_iter()
            .collect();
        let next: BTreeSet<CandidateId> = new_selection.iter().copied().collect();
        if previous == next {
            return Ok(next.len());
        }

        self.deps
            .candidates
            .swap_selected(entity, kind, &new_selection, SelectedBy::Auto, Utc::now())
            .await?;

        // Materialize additions that are not in the cache yet. A matched
        // local placeholder is promoted in place of a re-download so the
        // placeholder sweep below cannot orphan a selected asset.
        for id in next.difference(&previous) {
            let Some(candidate) = self.deps.candidates.get(*id).await? else {
                continue;
            };
            let Some(content_hash) = candidate.content_hash.clone() else {
                continue;
            };
            let result = match self
                .deps
                .cache_files
                .get_by_hash(entity, &content_hash)
                .await?
            {
                Some(file) if file.source == AssetSource::Provider => Ok(()),
                Some(local) => self.promote_local_file(&candidate, &local).await,
                None => self.materialize_candidate(&candidate, &content_hash).await,
            };
            if let Err(err) = result {
                warn!(target: "enrichment", candidate = %id, error = %err, "cache materialization failed");
            }
        }

        // Drop cache files for removed selections.
        for id in previous.difference(&next) {
            let Some(candidate) = self.deps.candidates.get(*id).await? else {
                continue;
            };
            let Some(content_hash) = candidate.content_hash else {
                continue;
            };
            if let Some(file) = self.deps.cache_files.get_by_hash(entity, &content_hash).await? {
                let _ = std::fs::remove_file(&file.file_path);
                self.deps.cache_files.delete(file.id).await?;
            }
        }

        // Scanned-in placeholders are superseded by real selections; their
        // files go to trash, never straight to unlink.
        for local in self.deps.cache_files.list_local_for(entity, kind).await? {
            let path = std::path::Path::new(&local.file_path);
            if path.exists() {
                if let Err(err) = crate::naming::recycle(path, &self.deps.trash_root()) {
                    warn!(target: "enrichment", path = %local.file_path, error = %err, "placeholder recycle failed");
                }
            }
            self.deps.cache_files.delete(local.id).await?;
        }

        Ok(next.len())
    }

    /// Copy a scanned-in placeholder into the canonical cache layout and
    /// retag its row, keeping the bytes we already have on disk.
    async fn promote_local_file(
        &self,
        candidate: &AssetCandidate,
        local: &CacheFile,
    ) -> WorkflowResult<()> {
        let ext = std::path::Path::new(&local.file_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| url_extension(&candidate.url));
        let target = asset_cache_path(
            self.deps.cache_root(),
            candidate.kind,
            &local.content_hash,
            &ext,
        );
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&local.file_path, &target).await?;
        self.deps
            .cache_files
            .relocate(local.id, &target.to_string_lossy(), AssetSource::Provider)
            .await?;
        self.deps
            .cache_files
            .link_provider(local.id, candidate.provider, &candidate.url)
            .await?;
        Ok(())
    }

    async fn materialize_candidate(
        &self,
        candidate: &AssetCandidate,
        content_hash: &str,
    ) -> WorkflowResult<()> {
        let bytes = self.deps.fetch_bytes(&candidate.url).await?;
        let ext = candidate
            .format
            .clone()
            .unwrap_or_else(|| url_extension(&candidate.url));
        let path = asset_cache_path(self.deps.cache_root(), candidate.kind, content_hash, &ext);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;

        self.deps
            .cache_files
            .insert(CacheFile {
                id: CacheFileId(0),
                entity: candidate.entity,
                kind: candidate.kind,
                file_path: path.to_string_lossy().to_string(),
                file_size: bytes.len() as i64,
                content_hash: content_hash.to_string(),
                perceptual_hash: candidate.perceptual_hash,
                width: candidate.width,
                height: candidate.height,
                source: AssetSource::Provider,
                source_url: Some(candidate.url.clone()),
                provider: Some(candidate.provider),
                created_at: Utc::now(),
            })
            .await?;
        self.deps
            .candidates
            .mark_downloaded(candidate.id, content_hash)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 5C — actor thumbnails (movies only)
    // ------------------------------------------------------------------

    async fn phase5c_actor_thumbs(&self, movie: &Movie) {
        let cast = match self.deps.movies.get_cast(movie.id).await {
            Ok(cast) => cast,
            Err(err) => {
                warn!(target: "enrichment", movie_id = %movie.id, error = %err, "cast lookup failed");
                return;
            }
        };

        for member in cast {
            if let Err(err) = self.cache_actor_thumb(member.actor_id).await {
                // Actor failures are skipped, never fatal.
                debug!(target: "enrichment", actor_id = %member.actor_id, error = %err, "actor thumb skipped");
            }
        }
    }

    async fn cache_actor_thumb(&self, actor_id: curarr_domain::ActorId) -> WorkflowResult<()> {
        let Some(actor) = self.deps.actors.get_by_id(actor_id).await? else {
            return Ok(());
        };
        if actor.image_cache_path.is_some() {
            return Ok(());
        }
        let Some(thumb_url) = actor.thumb_url.clone() else {
            return Ok(());
        };

        let bytes = self.deps.fetch_bytes(&thumb_url).await?;
        // Dimensions are decoded before the row is written; no zero-size
        // entries.
        let analysis = analyze_image(&bytes)
            .map_err(|err| WorkflowError::validation(format!("undecodable thumb: {err}")))?;
        let path = actor_cache_path(
            self.deps.cache_root(),
            &analysis.content_hash,
            &analysis.format,
        );
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;

        self.deps
            .cache_files
            .insert(CacheFile {
                id: CacheFileId(0),
                entity: EntityRef::actor(actor_id),
                kind: AssetKind::Thumb,
                file_path: path.to_string_lossy().to_string(),
                file_size: bytes.len() as i64,
                content_hash: analysis.content_hash.clone(),
                perceptual_hash: Some(analysis.perceptual_hash),
                width: Some(analysis.width as i32),
                height: Some(analysis.height as i32),
                source: AssetSource::Provider,
                source_url: Some(thumb_url),
                provider: Some(Provider::Tmdb),
                created_at: Utc::now(),
            })
            .await?;
        self.deps
            .actors
            .update_image(
                actor_id,
                &analysis.content_hash,
                &path.to_string_lossy(),
            )
            .await?;
        Ok(())
    }
}

/// Walk candidates by score descending and keep the best `limit` entries
/// whose perceptual hashes are not near-duplicates of anything already kept.
pub fn select_top_unique(
    candidates: &[AssetCandidate],
    limit: usize,
    dedup_threshold: f64,
) -> Vec<CandidateId> {
    let mut sorted: Vec<&AssetCandidate> = candidates
        .iter()
        .filter(|c| !c.is_rejected && c.score.is_some())
        .collect();
    sorted.sort_by(|a, b| {
        b.score
            .unwrap_or(0)
            .cmp(&a.score.unwrap_or(0))
            .then(a.id.cmp(&b.id))
    });

    let mut accepted_hashes: Vec<u64> = Vec::new();
    let mut selected = Vec::new();
    for candidate in sorted {
        if selected.len() >= limit {
            break;
        }
        if let Some(hash) = candidate.perceptual_hash {
            let duplicate = accepted_hashes
                .iter()
                .any(|accepted| hamming_similarity(*accepted, hash) >= dedup_threshold);
            if duplicate {
                continue;
            }
            accepted_hashes.push(hash);
        }
        selected.push(candidate.id);
    }
    selected
}

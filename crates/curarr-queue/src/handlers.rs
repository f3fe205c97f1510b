// SPDX-License-Identifier: GPL-3.0-or-later
//! The dispatch table: one handler per job type, each responsible for its
//! primary side effect and for deciding whether the next chain stage runs.
//! Workflow toggles are re-read from settings on every routing decision;
//! turning one off stops the chain at that boundary but already-enqueued
//! downstream jobs keep running.

use chrono::{DateTime, Utc};
use curarr_application::{
    decide_webhook, enrichment::EnrichmentPipeline, events, EnrichmentOptions, Publisher,
    ScanService, Verifier, VerifyFollowUp, WebhookDecision, WorkflowError, WorkflowResult,
};
use curarr_domain::{
    AutomationMode, ChainContext, EntityKind, JobId, JobPayload, JobPriority, JobSpec, Library,
    LibraryId, MovieId, NotifierKind, Provider, RefreshLogEntry,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use curarr_application::Deps;

/// Execution context a worker hands to the handler. `shutdown` flips when the
/// pool drains; long handlers should return promptly once it does.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub worker_id: String,
    pub execution_time: DateTime<Utc>,
    pub shutdown: watch::Receiver<bool>,
}

impl JobContext {
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Route one decoded payload to its handler.
pub async fn dispatch(deps: &Arc<Deps>, ctx: &JobContext, payload: JobPayload) -> WorkflowResult<()> {
    match payload {
        JobPayload::WebhookReceived { payload } => handle_webhook(deps, ctx, payload).await,
        JobPayload::ScanMovie {
            library_id,
            directory,
            chain,
        }
        | JobPayload::DirectoryScan {
            library_id,
            directory,
            chain,
        } => handle_directory_scan(deps, ctx, library_id, &directory, chain).await,
        JobPayload::DiscoverAssets { movie_id, chain } => {
            handle_discover_assets(deps, ctx, movie_id, chain).await
        }
        JobPayload::FetchProviderAssets {
            movie_id,
            force_refresh,
            chain,
        } => handle_fetch_provider_assets(deps, ctx, movie_id, force_refresh, chain).await,
        JobPayload::EnrichMetadata {
            movie_id,
            manual,
            force_refresh,
            require_complete,
            chain,
        } => {
            handle_enrich(deps, ctx, movie_id, manual, force_refresh, require_complete, chain)
                .await
        }
        JobPayload::SelectAssets { movie_id, chain } => {
            handle_select(deps, ctx, movie_id, chain).await
        }
        JobPayload::Publish { movie_id, chain } => handle_publish(deps, ctx, movie_id, chain).await,
        JobPayload::VerifyMovie { movie_id, chain } => {
            handle_verify(deps, ctx, movie_id, chain).await
        }
        JobPayload::LibraryScan { library_id } => handle_library_scan(deps, ctx, library_id).await,
        JobPayload::CacheAsset { candidate_id } => {
            EnrichmentPipeline::new(deps).cache_candidate(candidate_id).await
        }
        JobPayload::NotifyKodi {
            library_id,
            directory,
        } => notify_player(deps, "kodi", library_id, directory.as_deref()).await,
        JobPayload::NotifyJellyfin {
            library_id,
            directory,
        } => notify_player(deps, "jellyfin", library_id, directory.as_deref()).await,
        JobPayload::NotifyPlex {
            library_id,
            directory,
        } => notify_player(deps, "plex", library_id, directory.as_deref()).await,
        JobPayload::NotifyDiscord { message } => {
            deps.notifier.notify_message("discord", &message).await
        }
        JobPayload::NotifyPushover { message } => {
            deps.notifier.notify_message("pushover", &message).await
        }
        JobPayload::NotifyEmail { subject, message } => {
            deps.notifier
                .notify_message("email", &format!("{subject}: {message}"))
                .await
        }
        JobPayload::ScheduledFileScan {} => handle_scheduled_file_scan(deps, ctx).await,
        JobPayload::ScheduledProviderUpdate {} => handle_scheduled_provider_update(deps, ctx).await,
        JobPayload::ScheduledCleanup {} => handle_scheduled_cleanup(deps).await,
    }
}

async fn enqueue(
    deps: &Deps,
    ctx: &JobContext,
    payload: JobPayload,
    priority: JobPriority,
) -> WorkflowResult<()> {
    deps.jobs
        .insert(JobSpec::new(payload).with_priority(priority).with_parent(ctx.job_id))
        .await?;
    Ok(())
}

/// Fan out one notify job per target the library enables, filtered by the
/// process-wide channel allow-list. `players_only` restricts the set to scan
/// invocations (the publish and verify follow-ups).
async fn enqueue_notifiers(
    deps: &Deps,
    ctx: &JobContext,
    library: &Library,
    directory: Option<String>,
    players_only: bool,
    subject: &str,
    message: &str,
    priority: JobPriority,
) -> WorkflowResult<()> {
    for kind in &library.notifiers {
        if players_only && !kind.is_player() {
            continue;
        }
        let name = kind.to_string();
        if !deps
            .config
            .notifications
            .enabled
            .iter()
            .any(|enabled| enabled == &name)
        {
            debug!(target: "jobs", notifier = %name, "channel disabled globally, skipping");
            continue;
        }
        let payload = match kind {
            NotifierKind::Kodi => JobPayload::NotifyKodi {
                library_id: library.id,
                directory: directory.clone(),
            },
            NotifierKind::Jellyfin => JobPayload::NotifyJellyfin {
                library_id: library.id,
                directory: directory.clone(),
            },
            NotifierKind::Plex => JobPayload::NotifyPlex {
                library_id: library.id,
                directory: directory.clone(),
            },
            NotifierKind::Discord => JobPayload::NotifyDiscord {
                message: message.to_string(),
            },
            NotifierKind::Pushover => JobPayload::NotifyPushover {
                message: message.to_string(),
            },
            NotifierKind::Email => JobPayload::NotifyEmail {
                subject: subject.to_string(),
                message: message.to_string(),
            },
        };
        enqueue(deps, ctx, payload, priority).await?;
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Chain handlers
// ----------------------------------------------------------------------------

async fn handle_webhook(
    deps: &Arc<Deps>,
    ctx: &JobContext,
    payload: curarr_domain::WebhookPayload,
) -> WorkflowResult<()> {
    let toggles = deps.settings.workflow_toggles().await?;
    if !toggles.webhooks {
        debug!(target: "jobs", "webhooks toggle off, chain stops");
        return Ok(());
    }

    match decide_webhook(deps, &payload).await? {
        WebhookDecision::Ignored => Ok(()),
        WebhookDecision::ScanMovie {
            library_id,
            directory,
        } => {
            let mut chain = ChainContext::new(format!("webhook:{}", payload.source));
            chain.root_job = Some(ctx.job_id.0);
            if let Some(movie) = &payload.movie {
                chain.tmdb_id = movie.tmdb_id;
                chain.imdb_id = movie.imdb_id.clone();
            }
            enqueue(
                deps,
                ctx,
                JobPayload::ScanMovie {
                    library_id,
                    directory: directory.clone(),
                    chain,
                },
                JobPriority::HIGH,
            )
            .await?;

            // Every enabled player and notifier hears about the download
            // immediately.
            let library = deps
                .libraries
                .get_by_id(library_id)
                .await?
                .ok_or_else(|| WorkflowError::fatal(format!("library not found: {library_id}")))?;
            let title = payload
                .movie
                .as_ref()
                .map(|movie| movie.title.clone())
                .unwrap_or_else(|| directory.clone());
            enqueue_notifiers(
                deps,
                ctx,
                &library,
                Some(directory),
                false,
                "Download received",
                &format!("Downloaded: {title}"),
                JobPriority::HIGH,
            )
            .await
        }
    }
}

async fn handle_directory_scan(
    deps: &Arc<Deps>,
    ctx: &JobContext,
    library_id: LibraryId,
    directory: &str,
    chain: ChainContext,
) -> WorkflowResult<()> {
    let toggles = deps.settings.workflow_toggles().await?;
    if !toggles.scanning {
        debug!(target: "jobs", "scanning toggle off, chain stops");
        return Ok(());
    }

    let scan = ScanService::new(deps);
    let mut result = scan.ingest_directory(library_id, directory).await?;

    // A webhook chain already knows the provider ids; use them when the
    // directory itself carried no NFO identification.
    if !result.identified && (chain.tmdb_id.is_some() || chain.imdb_id.is_some()) {
        if let Some(mut movie) = deps.movies.get_by_id(result.movie_id).await? {
            movie.tmdb_id = movie.tmdb_id.or(chain.tmdb_id);
            movie.imdb_id = movie.imdb_id.or_else(|| chain.imdb_id.clone());
            if movie.tmdb_id.is_some() || movie.imdb_id.is_some() {
                movie.identification_status = curarr_domain::IdentificationStatus::Identified;
                deps.movies.update(movie).await?;
                result.identified = true;
            }
        }
    }

    if result.identified && toggles.identification {
        enqueue(
            deps,
            ctx,
            JobPayload::DiscoverAssets {
                movie_id: result.movie_id,
                chain,
            },
            JobPriority::NORMAL,
        )
        .await?;
    }
    Ok(())
}

async fn handle_discover_assets(
    deps: &Arc<Deps>,
    ctx: &JobContext,
    movie_id: MovieId,
    chain: ChainContext,
) -> WorkflowResult<()> {
    let scan = ScanService::new(deps);
    let discovered = scan.discover_local_assets(movie_id).await?;
    debug!(target: "jobs", movie_id = %movie_id, discovered, "local assets discovered");

    let toggles = deps.settings.workflow_toggles().await?;
    if toggles.enrichment {
        enqueue(
            deps,
            ctx,
            JobPayload::FetchProviderAssets {
                movie_id,
                force_refresh: false,
                chain,
            },
            JobPriority::NORMAL,
        )
        .await?;
    }
    Ok(())
}

async fn handle_fetch_provider_assets(
    deps: &Arc<Deps>,
    ctx: &JobContext,
    movie_id: MovieId,
    force_refresh: bool,
    chain: ChainContext,
) -> WorkflowResult<()> {
    let movie = deps
        .movies
        .get_by_id(movie_id)
        .await?
        .ok_or_else(|| WorkflowError::validation(format!("movie not found: {movie_id}")))?;
    let Some(tmdb_id) = movie.tmdb_id else {
        return Err(WorkflowError::validation(
            "cannot fetch provider assets without a tmdb id",
        ));
    };

    // Warm the provider cache; the enrichment phases read through it.
    let outcome = curarr_application::fetch_movie_metadata(
        deps,
        tmdb_id,
        &curarr_application::FetchOptions { force_refresh },
    )
    .await?;
    deps.refresh_log
        .upsert(RefreshLogEntry {
            entity_kind: EntityKind::Movie,
            entity_id: movie_id.0,
            provider: Provider::Tmdb,
            last_checked: Utc::now(),
            last_modified: None,
            needs_refresh: false,
        })
        .await?;
    debug!(
        target: "jobs",
        movie_id = %movie_id,
        source = ?outcome.source,
        providers = outcome.providers.len(),
        "provider cache warmed"
    );

    // Per-entity single flight: a concurrent enrichment suppresses this one.
    let suppressed = deps
        .jobs
        .insert_unless_active(
            JobSpec::new(JobPayload::EnrichMetadata {
                movie_id,
                manual: false,
                force_refresh: false,
                require_complete: false,
                chain,
            })
            .with_priority(JobPriority::NORMAL)
            .with_parent(ctx.job_id),
        )
        .await?
        .is_none();
    if suppressed {
        debug!(target: "jobs", movie_id = %movie_id, "enrichment already active, not chaining");
    }
    Ok(())
}

async fn handle_enrich(
    deps: &Arc<Deps>,
    ctx: &JobContext,
    movie_id: MovieId,
    manual: bool,
    force_refresh: bool,
    require_complete: bool,
    chain: ChainContext,
) -> WorkflowResult<()> {
    let pipeline = EnrichmentPipeline::new(deps);
    let result = pipeline
        .run_metadata_phases(
            movie_id,
            EnrichmentOptions {
                manual,
                force_refresh,
            },
        )
        .await;

    match result {
        Ok(_) => {
            if require_complete {
                deps.bulk.record_outcome(deps, movie_id, true).await;
            }
            enqueue(
                deps,
                ctx,
                JobPayload::SelectAssets { movie_id, chain },
                JobPriority::NORMAL,
            )
            .await
        }
        Err(err) => {
            if err.is_rate_limit() && require_complete {
                deps.bulk.signal_rate_limit(deps, &err.message).await;
            }
            if require_complete {
                deps.bulk.record_outcome(deps, movie_id, false).await;
            }
            deps.hub
                .publish(events::enrichment_failed(movie_id, &err.message));
            Err(err)
        }
    }
}

async fn handle_select(
    deps: &Arc<Deps>,
    ctx: &JobContext,
    movie_id: MovieId,
    chain: ChainContext,
) -> WorkflowResult<()> {
    let pipeline = EnrichmentPipeline::new(deps);
    let selected = pipeline.run_selection(movie_id).await?;
    debug!(target: "jobs", movie_id = %movie_id, selected, "selection finished");

    let toggles = deps.settings.workflow_toggles().await?;
    if !toggles.publishing {
        debug!(target: "jobs", "publishing toggle off, chain stops");
        return Ok(());
    }

    // Automation mode gates auto-publish: yolo publishes, hybrid waits for
    // the user, manual never got here on its own.
    let movie = deps
        .movies
        .get_by_id(movie_id)
        .await?
        .ok_or_else(|| WorkflowError::validation(format!("movie not found: {movie_id}")))?;
    let library = deps
        .libraries
        .get_by_id(movie.library_id)
        .await?
        .ok_or_else(|| WorkflowError::fatal(format!("library not found: {}", movie.library_id)))?;

    if library.automation == AutomationMode::Yolo && library.auto_publish {
        enqueue(
            deps,
            ctx,
            JobPayload::Publish { movie_id, chain },
            JobPriority::NORMAL,
        )
        .await?;
    }
    Ok(())
}

async fn handle_publish(
    deps: &Arc<Deps>,
    ctx: &JobContext,
    movie_id: MovieId,
    _chain: ChainContext,
) -> WorkflowResult<()> {
    let publisher = Publisher::new(deps);
    let outcome = publisher.publish_movie(movie_id).await?;
    info!(target: "jobs", movie_id = %movie_id, files = outcome.files_written, "published");

    let movie = deps
        .movies
        .get_by_id(movie_id)
        .await?
        .ok_or_else(|| WorkflowError::validation(format!("movie not found: {movie_id}")))?;
    let library = deps
        .libraries
        .get_by_id(movie.library_id)
        .await?
        .ok_or_else(|| WorkflowError::fatal(format!("library not found: {}", movie.library_id)))?;
    enqueue_notifiers(
        deps,
        ctx,
        &library,
        Some(movie.directory.clone()),
        true,
        "Published",
        &format!("Published: {}", movie.title),
        JobPriority::NORMAL,
    )
    .await
}

async fn handle_verify(
    deps: &Arc<Deps>,
    ctx: &JobContext,
    movie_id: MovieId,
    chain: ChainContext,
) -> WorkflowResult<()> {
    let verifier = Verifier::new(deps);
    let outcome = verifier.verify_movie(movie_id).await?;

    match outcome.follow_up() {
        VerifyFollowUp::Republish => {
            enqueue(
                deps,
                ctx,
                JobPayload::Publish { movie_id, chain },
                JobPriority::NORMAL,
            )
            .await
        }
        VerifyFollowUp::NotifyPlayers => {
            let movie = deps
                .movies
                .get_by_id(movie_id)
                .await?
                .ok_or_else(|| WorkflowError::validation(format!("movie not found: {movie_id}")))?;
            let library = deps
                .libraries
                .get_by_id(movie.library_id)
                .await?
                .ok_or_else(|| {
                    WorkflowError::fatal(format!("library not found: {}", movie.library_id))
                })?;
            enqueue_notifiers(
                deps,
                ctx,
                &library,
                Some(movie.directory.clone()),
                true,
                "Verified",
                &format!("Restored assets for: {}", movie.title),
                JobPriority::NORMAL,
            )
            .await
        }
        VerifyFollowUp::None => Ok(()),
    }
}

async fn handle_library_scan(
    deps: &Arc<Deps>,
    ctx: &JobContext,
    library_id: LibraryId,
) -> WorkflowResult<()> {
    let toggles = deps.settings.workflow_toggles().await?;
    if !toggles.scanning {
        return Ok(());
    }
    let scan = ScanService::new(deps);
    let directories = scan.list_movie_directories(library_id).await?;
    for directory in directories {
        if ctx.is_cancelled() {
            return Err(WorkflowError::transient("shutdown during library scan"));
        }
        enqueue(
            deps,
            ctx,
            JobPayload::DirectoryScan {
                library_id,
                directory: directory.to_string_lossy().to_string(),
                chain: ChainContext::new("library-scan"),
            },
            JobPriority::LOW,
        )
        .await?;
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Scheduled handlers
// ----------------------------------------------------------------------------

async fn handle_scheduled_file_scan(deps: &Arc<Deps>, ctx: &JobContext) -> WorkflowResult<()> {
    for library in deps.libraries.list_enabled().await? {
        if !library.auto_scan {
            continue;
        }
        enqueue(
            deps,
            ctx,
            JobPayload::LibraryScan {
                library_id: library.id,
            },
            JobPriority::SCHEDULED,
        )
        .await?;
    }
    Ok(())
}

async fn handle_scheduled_provider_update(
    deps: &Arc<Deps>,
    ctx: &JobContext,
) -> WorkflowResult<()> {
    let Some(tmdb) = deps.tmdb.clone() else {
        debug!(target: "jobs", "no tmdb client, provider update skipped");
        return Ok(());
    };
    let cutoff = Utc::now() - chrono::Duration::days(deps.config.providers.cache_ttl_days);

    for movie_id in deps.movies.list_monitored_ids().await? {
        if ctx.is_cancelled() {
            return Err(WorkflowError::transient("shutdown during provider update"));
        }
        let log_entry = deps
            .refresh_log
            .get(EntityKind::Movie, movie_id.0, Provider::Tmdb)
            .await?;
        let due = match &log_entry {
            Some(entry) => entry.needs_refresh || entry.last_checked < cutoff,
            None => true,
        };
        if !due {
            continue;
        }

        let movie = match deps.movies.get_by_id(movie_id).await? {
            Some(movie) => movie,
            None => continue,
        };
        let Some(tmdb_id) = movie.tmdb_id else {
            continue;
        };

        // "Changes since" guard: a clean answer just refreshes the log.
        let since = log_entry
            .as_ref()
            .map(|e| e.last_checked)
            .unwrap_or_else(|| Utc::now() - chrono::Duration::days(14));
        let changed = match tmdb.movie_changed_since(tmdb_id, since).await {
            Ok(changed) => changed,
            Err(err) => {
                warn!(target: "jobs", movie_id = %movie_id, error = %err, "changes check failed");
                continue;
            }
        };
        deps.refresh_log
            .upsert(RefreshLogEntry {
                entity_kind: EntityKind::Movie,
                entity_id: movie_id.0,
                provider: Provider::Tmdb,
                last_checked: Utc::now(),
                last_modified: changed.then(Utc::now),
                needs_refresh: false,
            })
            .await?;

        if changed {
            deps.jobs
                .insert_unless_active(
                    JobSpec::new(JobPayload::EnrichMetadata {
                        movie_id,
                        manual: false,
                        force_refresh: true,
                        require_complete: false,
                        chain: ChainContext::new("scheduled-provider-update"),
                    })
                    .with_priority(JobPriority::SCHEDULED)
                    .with_parent(ctx.job_id),
                )
                .await?;
        }
    }
    Ok(())
}

async fn handle_scheduled_cleanup(deps: &Arc<Deps>) -> WorkflowResult<()> {
    let completed_cutoff =
        Utc::now() - chrono::Duration::days(deps.config.queue.completed_retention_days);
    let failed_cutoff = Utc::now() - chrono::Duration::days(deps.config.queue.failed_retention_days);
    let purged = deps.jobs.cleanup(completed_cutoff, failed_cutoff).await?;

    // Orphan sweep: cache files nothing selected references any more.
    let mut swept = 0usize;
    for orphan in deps.cache_files.list_orphans().await? {
        let _ = std::fs::remove_file(&orphan.file_path);
        deps.cache_files.delete(orphan.id).await?;
        swept += 1;
    }
    info!(target: "jobs", purged, swept, "cleanup finished");
    Ok(())
}

async fn notify_player(
    deps: &Arc<Deps>,
    player: &str,
    library_id: LibraryId,
    directory: Option<&str>,
) -> WorkflowResult<()> {
    deps.notifier.notify_scan(player, library_id, directory).await?;
    deps.hub
        .publish(events::player_status(player, library_id, "scan-requested"));
    Ok(())
}

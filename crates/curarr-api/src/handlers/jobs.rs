// SPDX-License-Identifier: GPL-3.0-or-later
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use curarr_domain::{
    ChainContext, JobPayload, JobPriority, JobQueueStats, JobSpec, LibraryId, MovieId,
};
use serde::Serialize;

use super::{error_response, ErrorResponse};
use crate::ApiState;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobAccepted {
    pub job_id: i64,
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/stats",
    responses((status = 200, description = "Queue counters")),
    tag = "jobs"
)]
pub async fn queue_stats(
    State(state): State<ApiState>,
) -> Result<Json<JobQueueStats>, (StatusCode, Json<ErrorResponse>)> {
    let stats = state
        .deps
        .jobs
        .stats()
        .await
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    Ok(Json(stats))
}

/// Manual enrichment trigger. Suppressed when an enrichment for the movie is
/// already active.
#[utoipa::path(
    post,
    path = "/api/v1/movies/{id}/enrich",
    params(("id" = i64, Path, description = "Movie id")),
    responses(
        (status = 202, body = JobAccepted),
        (status = 409, description = "Enrichment already active", body = ErrorResponse)
    ),
    tag = "movies"
)]
pub async fn enrich_movie(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<JobAccepted>), (StatusCode, Json<ErrorResponse>)> {
    let spec = JobSpec::new(JobPayload::EnrichMetadata {
        movie_id: MovieId(id),
        manual: true,
        force_refresh: true,
        require_complete: false,
        chain: ChainContext::new("user"),
    })
    .with_priority(JobPriority::HIGH);

    match state.deps.jobs.insert_unless_active(spec).await {
        Ok(Some(job)) => Ok((
            StatusCode::ACCEPTED,
            Json(JobAccepted { job_id: job.id.0 }),
        )),
        Ok(None) => Err(error_response(
            StatusCode::CONFLICT,
            "enrichment already active for this movie",
        )),
        Err(err) => Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            err.to_string(),
        )),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/movies/{id}/verify",
    params(("id" = i64, Path, description = "Movie id")),
    responses((status = 202, body = JobAccepted)),
    tag = "movies"
)]
pub async fn verify_movie(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<JobAccepted>), (StatusCode, Json<ErrorResponse>)> {
    let job = state
        .deps
        .jobs
        .insert(
            JobSpec::new(JobPayload::VerifyMovie {
                movie_id: MovieId(id),
                chain: ChainContext::new("user"),
            })
            .with_priority(JobPriority::HIGH),
        )
        .await
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted { job_id: job.id.0 }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/libraries/{id}/scan",
    params(("id" = i64, Path, description = "Library id")),
    responses((status = 202, body = JobAccepted)),
    tag = "libraries"
)]
pub async fn scan_library(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<JobAccepted>), (StatusCode, Json<ErrorResponse>)> {
    let job = state
        .deps
        .jobs
        .insert(
            JobSpec::new(JobPayload::LibraryScan {
                library_id: LibraryId(id),
            })
            .with_priority(JobPriority::HIGH),
        )
        .await
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted { job_id: job.id.0 }),
    ))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BulkStarted {
    pub enqueued: u64,
}

#[utoipa::path(
    post,
    path = "/api/v1/bulk/enrich",
    responses(
        (status = 202, body = BulkStarted),
        (status = 409, description = "A bulk run is already active", body = ErrorResponse)
    ),
    tag = "bulk"
)]
pub async fn bulk_start(
    State(state): State<ApiState>,
) -> Result<(StatusCode, Json<BulkStarted>), (StatusCode, Json<ErrorResponse>)> {
    match state.deps.bulk.start_run(&state.deps).await {
        Ok(enqueued) => Ok((StatusCode::ACCEPTED, Json(BulkStarted { enqueued }))),
        Err(err) => Err(error_response(StatusCode::CONFLICT, err.to_string())),
    }
}

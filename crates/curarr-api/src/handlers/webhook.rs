// SPDX-License-Identifier: GPL-3.0-or-later
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use curarr_domain::{JobPayload, JobPriority, JobSpec, WebhookPayload};
use serde::Serialize;
use tracing::info;

use super::{error_response, ErrorResponse};
use crate::ApiState;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct WebhookAccepted {
    pub job_id: i64,
}

/// Accept a downloader webhook and enqueue the intake job. Validation beyond
/// payload shape happens inside the handler chain.
#[utoipa::path(
    post,
    path = "/api/v1/webhook",
    responses(
        (status = 202, description = "Webhook accepted", body = WebhookAccepted),
        (status = 500, description = "Queue unavailable", body = ErrorResponse)
    ),
    tag = "webhook"
)]
pub async fn receive_webhook(
    State(state): State<ApiState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<(StatusCode, Json<WebhookAccepted>), (StatusCode, Json<ErrorResponse>)> {
    info!(
        target: "api",
        source = %payload.source,
        event = ?payload.event_type,
        "webhook received"
    );

    let job = state
        .deps
        .jobs
        .insert(
            JobSpec::new(JobPayload::WebhookReceived { payload })
                .with_priority(JobPriority::HIGH),
        )
        .await
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAccepted { job_id: job.id.0 }),
    ))
}

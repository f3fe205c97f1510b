// SPDX-License-Identifier: GPL-3.0-or-later
use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderCallError>;

/// Failure taxonomy shared by every provider client. Callers classify these
/// into retry behavior: rate limits pause bulk runs, 404s are recorded on the
/// refresh log, everything transport-shaped retries with backoff.
#[derive(Debug, Error)]
pub enum ProviderCallError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited (retry after: {retry_after:?})")]
    RateLimited { retry_after: Option<u64> },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("provider API error: {message}")]
    Api { message: String },

    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("rate limiter closed")]
    RateLimiterClosed,
}

impl ProviderCallError {
    /// Transport failures and 5xx responses are worth retrying; everything
    /// else is a terminal answer from the provider.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimiterClosed => true,
            Self::HttpStatus { status, .. } => status.is_server_error(),
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Map a non-success response into the taxonomy.
pub(crate) fn status_error(
    status: StatusCode,
    body: String,
    retry_after: Option<u64>,
    resource: &str,
) -> ProviderCallError {
    match status {
        StatusCode::NOT_FOUND => ProviderCallError::NotFound(resource.to_string()),
        StatusCode::TOO_MANY_REQUESTS => ProviderCallError::RateLimited { retry_after },
        _ => ProviderCallError::HttpStatus { status, body },
    }
}

pub(crate) fn retry_after_header(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

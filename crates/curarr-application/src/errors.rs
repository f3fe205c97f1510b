// SPDX-License-Identifier: GPL-3.0-or-later
use curarr_metadata::ProviderCallError;
use thiserror::Error;

/// The classification every handler failure lands in. The worker consults
/// `is_transient()` to route into the job store's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Provider timeouts, 5xx, connection errors. Retried with backoff.
    TransientNetwork,
    /// Provider-signalled throttling. Pauses bulk runs; individual jobs
    /// retry after the provider-supplied delay.
    RateLimit,
    /// The provider does not know the entity. Recorded, not retried.
    NotFound,
    /// Invalid payload or inconsistent input. Fails permanently.
    Validation,
    /// Database contention. Retried with short backoff.
    StorageBusy,
    /// Invariant violation. Fails permanently and surfaces loudly.
    Fatal,
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct WorkflowError {
    pub kind: ErrorKind,
    pub message: String,
    /// Provider-supplied retry delay for rate limits, in seconds.
    pub retry_after: Option<u64>,
}

impl WorkflowError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetwork, message)
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self {
            kind: ErrorKind::RateLimit,
            message: message.into(),
            retry_after,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::TransientNetwork | ErrorKind::RateLimit | ErrorKind::StorageBusy
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        self.kind == ErrorKind::RateLimit
    }
}

impl From<ProviderCallError> for WorkflowError {
    fn from(err: ProviderCallError) -> Self {
        match &err {
            ProviderCallError::RateLimited { retry_after } => {
                Self::rate_limit(err.to_string(), *retry_after)
            }
            ProviderCallError::NotFound(_) => Self::not_found(err.to_string()),
            _ if err.is_transient() => Self::transient(err.to_string()),
            _ => Self::validation(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        // Repository errors come through anyhow; treat them as storage
        // contention so they retry rather than fail a chain outright.
        Self::new(ErrorKind::StorageBusy, format!("{err:#}"))
    }
}

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        Self::transient(err.to_string())
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(err.to_string())
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_onto_the_taxonomy() {
        let rl: WorkflowError = ProviderCallError::RateLimited {
            retry_after: Some(30),
        }
        .into();
        assert!(rl.is_rate_limit());
        assert!(rl.is_transient());
        assert_eq!(rl.retry_after, Some(30));

        let nf: WorkflowError = ProviderCallError::NotFound("movie/1".into()).into();
        assert_eq!(nf.kind, ErrorKind::NotFound);
        assert!(!nf.is_transient());
    }

    #[test]
    fn validation_and_fatal_never_retry() {
        assert!(!WorkflowError::validation("bad payload").is_transient());
        assert!(!WorkflowError::fatal("invariant broken").is_transient());
    }
}

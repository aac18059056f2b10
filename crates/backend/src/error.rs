/// All errors a backend collaborator can surface, classified the way the
/// engine's retry layer consumes them.
///
/// The taxonomy drives retry behavior:
/// - `Transient` — retry with exponential backoff
/// - `RateLimited` — retry with a longer backoff base, bounded attempts
/// - `Conflict` — the server rejected a write due to stale or invalid
///   state; surfaced to the caller, never retried or silently merged
/// - `Fatal` — resource-exhaustion-class or non-retryable failure;
///   propagated immediately
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Timeout, 5xx-equivalent, or transport-level failure. Safe to retry.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// 429-equivalent. Retry with a longer backoff.
    #[error("rate limited by backend: {0}")]
    RateLimited(String),

    /// Server rejected a write due to stale/invalid state.
    #[error("backend conflict: {0}")]
    Conflict(String),

    /// Non-retryable failure. Propagated immediately.
    #[error("fatal backend failure: {0}")]
    Fatal(String),
}

impl BackendError {
    /// Whether the retry layer may re-issue the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Transient(_) | BackendError::RateLimited(_)
        )
    }
}

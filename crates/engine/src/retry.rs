//! Bounded exponential-backoff retry around backend operations.
//!
//! Classification contract:
//! - `Fatal` and `Conflict` propagate immediately, no retry
//! - `Transient` retries with `base * 2^attempt + jitter`; exhausted
//!   retries surface as [`ClientError::Unavailable`]
//! - `RateLimited` retries the same way from a longer base; exhausted
//!   retries surface as [`ClientError::RateLimited`]
//!
//! Every attempt is bounded by a per-attempt timeout, separate from the
//! backoff schedule, so a hung backend terminates deterministically.
//! `execute` may only wrap idempotent operations; non-idempotent writes go
//! through `execute_once`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use questline_backend::BackendError;

use crate::error::ClientError;

// ──────────────────────────────────────────────
// RetryPolicy
// ──────────────────────────────────────────────

/// Tunable retry behavior. The defaults match the spec: 3 retries,
/// exponential backoff with jitter, a longer base when rate limited.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,
    /// Backoff base for transient failures.
    pub base_backoff: Duration,
    /// Backoff base for rate-limited failures.
    pub rate_limit_backoff: Duration,
    /// Upper bound on a single backoff sleep.
    pub max_backoff: Duration,
    /// Per-attempt timeout. A timed-out attempt counts as transient.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(200),
            rate_limit_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy with near-zero sleeps, for tests.
    pub fn fast() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(1),
            rate_limit_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            attempt_timeout: Duration::from_millis(250),
        }
    }
}

// ──────────────────────────────────────────────
// RetryingClient
// ──────────────────────────────────────────────

/// Executes remote operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryingClient {
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(policy: RetryPolicy) -> Self {
        RetryingClient { policy }
    }

    /// Execute an idempotent operation with bounded retries.
    ///
    /// `op` is re-invoked for each attempt; the caller asserts that
    /// re-issuing it is safe.
    pub async fn execute<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, ClientError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0u32;
        loop {
            match self.attempt(operation, op()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    let backoff = self.backoff_for(&err, attempt);
                    log::debug!(
                        "'{}' attempt {} failed ({}), retrying in {:?}",
                        operation,
                        attempt + 1,
                        err,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(self.classify(operation, err, attempt + 1)),
            }
        }
    }

    /// Execute a non-idempotent operation: exactly one attempt, still
    /// timeout-bounded. Used for the external completion sink, which can
    /// be neither rolled back nor queried for duplicates.
    pub async fn execute_once<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T, ClientError>
    where
        Fut: Future<Output = Result<T, BackendError>>,
    {
        self.attempt(operation, fut)
            .await
            .map_err(|err| self.classify(operation, err, 1))
    }

    /// One timeout-bounded attempt. A timeout is folded into `Transient`
    /// so the classification table stays uniform.
    async fn attempt<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T, BackendError>
    where
        Fut: Future<Output = Result<T, BackendError>>,
    {
        match tokio::time::timeout(self.policy.attempt_timeout, fut).await {
            Ok(result) => result,
            Err(_elapsed) => Err(BackendError::Transient(format!(
                "'{}' timed out after {:?}",
                operation, self.policy.attempt_timeout
            ))),
        }
    }

    fn backoff_for(&self, err: &BackendError, attempt: u32) -> Duration {
        let base = match err {
            BackendError::RateLimited(_) => self.policy.rate_limit_backoff,
            _ => self.policy.base_backoff,
        };
        let exp = base.saturating_mul(1u32 << attempt.min(16));
        let jitter_ceil = (base.as_millis() as u64).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ceil));
        (exp + jitter).min(self.policy.max_backoff)
    }

    fn classify(&self, operation: &str, err: BackendError, attempts: u32) -> ClientError {
        match err {
            BackendError::Transient(_) => ClientError::Unavailable {
                operation: operation.to_string(),
                attempts,
            },
            BackendError::RateLimited(_) => ClientError::RateLimited {
                operation: operation.to_string(),
                attempts,
            },
            BackendError::Conflict(message) => ClientError::Conflict {
                operation: operation.to_string(),
                message,
            },
            BackendError::Fatal(message) => ClientError::Fatal {
                operation: operation.to_string(),
                message,
            },
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn client() -> RetryingClient {
        RetryingClient::new(RetryPolicy::fast())
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = client()
            .execute("op", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BackendError>(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_then_success_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = client()
            .execute("op", move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(BackendError::Transient("503".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_exhaustion_surfaces_unavailable() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, _> = client()
            .execute("progress:load", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::Transient("503".into()))
                }
            })
            .await;
        // 1 initial attempt + 3 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            result.unwrap_err(),
            ClientError::Unavailable {
                operation: "progress:load".to_string(),
                attempts: 4,
            }
        );
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_surfaces_distinctly() {
        let result: Result<u32, _> = client()
            .execute("op", || async {
                Err(BackendError::RateLimited("429".into()))
            })
            .await;
        assert!(matches!(
            result.unwrap_err(),
            ClientError::RateLimited { attempts: 4, .. }
        ));
    }

    #[tokio::test]
    async fn fatal_propagates_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, _> = client()
            .execute("op", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::Fatal("quota exhausted".into()))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result.unwrap_err(), ClientError::Fatal { .. }));
    }

    #[tokio::test]
    async fn conflict_propagates_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, _> = client()
            .execute("op", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::Conflict("stale".into()))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result.unwrap_err(), ClientError::Conflict { .. }));
    }

    #[tokio::test]
    async fn hung_attempt_times_out_as_transient() {
        let result: Result<u32, _> = client()
            .execute_once("op", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(1)
            })
            .await;
        assert!(matches!(
            result.unwrap_err(),
            ClientError::Unavailable { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn execute_once_never_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, _> = client()
            .execute_once("sink:submit", async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::Transient("flaky".into()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            ClientError::Unavailable { attempts: 1, .. }
        ));
    }
}

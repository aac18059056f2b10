//! At-most-once completion submission.
//!
//! State machine per user: `NotCompleted → Completed → Submitted`.
//! Entering `Completed` generates the claim code exactly once,
//! deterministically from `(user, timestamp)`; reconciliation adopts a
//! remotely issued code verbatim instead (remote wins). The transition to
//! `Submitted` happens only on an explicit claim, never automatically: the
//! external sink is non-transactional and cannot be queried for duplicates,
//! so the write is guarded by the durable submission ledger, checked and
//! set under the submission lock, and never retried.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use questline_backend::{
    BackendError, CompletionRecord, CompletionSink, CompletionStatus, SubmissionLedger,
};
use questline_catalog::UserId;

use crate::error::ClientError;
use crate::retry::RetryingClient;
use crate::single_flight::{FlightKey, SingleFlight};

// ──────────────────────────────────────────────
// State
// ──────────────────────────────────────────────

/// Where a user stands in the completion lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionState {
    NotCompleted,
    /// All levels complete, code issued, sink not yet written.
    Completed(CompletionRecord),
    /// The external sink write succeeded.
    Submitted(CompletionRecord),
}

impl CompletionState {
    pub fn record(&self) -> Option<&CompletionRecord> {
        match self {
            CompletionState::NotCompleted => None,
            CompletionState::Completed(record) | CompletionState::Submitted(record) => {
                Some(record)
            }
        }
    }
}

/// Claim code derived from user identity and the completion timestamp.
/// Re-derivable: the same inputs always produce the same code.
pub fn generate_code(user: &UserId, unix_timestamp: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.as_str().as_bytes());
    hasher.update(unix_timestamp.to_be_bytes());
    let digest = hasher.finalize();
    let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % 100_000;
    format!("USB{:05}", n)
}

// ──────────────────────────────────────────────
// CompletionSubmitter
// ──────────────────────────────────────────────

/// Guards the single irrevocable external write of a user's completion.
pub struct CompletionSubmitter {
    sink: Arc<dyn CompletionSink>,
    ledger: Arc<dyn SubmissionLedger>,
    client: RetryingClient,
    /// Submission lock: every check-then-set of the submitted flag runs
    /// under this mutex.
    state: tokio::sync::Mutex<CompletionState>,
    claim_flights: SingleFlight<CompletionRecord>,
}

impl CompletionSubmitter {
    pub fn new(
        sink: Arc<dyn CompletionSink>,
        ledger: Arc<dyn SubmissionLedger>,
        client: RetryingClient,
    ) -> Self {
        CompletionSubmitter {
            sink,
            ledger,
            client,
            state: tokio::sync::Mutex::new(CompletionState::NotCompleted),
            claim_flights: SingleFlight::new(),
        }
    }

    pub async fn current_state(&self) -> CompletionState {
        self.state.lock().await.clone()
    }

    /// Forget all per-session state. Used on user switch; the durable
    /// ledger is deliberately untouched.
    pub async fn reset(&self) {
        *self.state.lock().await = CompletionState::NotCompleted;
    }

    /// Enter `Completed`, generating the code on the first call only.
    /// Later calls return the already-issued record.
    pub async fn mark_completed(&self, user: &UserId, reward_title: &str) -> CompletionRecord {
        let mut state = self.state.lock().await;
        if let Some(record) = state.record() {
            return record.clone();
        }

        let now = time::OffsetDateTime::now_utc();
        let record = CompletionRecord {
            user_id: user.clone(),
            code: generate_code(user, now.unix_timestamp()),
            reward_title: reward_title.to_string(),
            submitted_at: now
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "unknown".to_string()),
        };
        log::info!(
            "completion reached for '{}': code {} issued",
            user,
            record.code
        );
        *state = CompletionState::Completed(record.clone());
        record
    }

    /// Fold the backend's authoritative completion status into local state.
    ///
    /// A remotely issued code always wins over a locally generated one, and
    /// the durable submitted flag promotes the state to `Submitted` so a
    /// reloaded session cannot write the sink twice.
    pub async fn reconcile(
        &self,
        user: &UserId,
        status: &CompletionStatus,
    ) -> Result<CompletionState, ClientError> {
        let mut state = self.state.lock().await;

        if status.completed {
            let code = match &status.code {
                Some(remote) => remote.clone(),
                None => match state.record() {
                    Some(record) => record.code.clone(),
                    None => generate_code(
                        user,
                        time::OffsetDateTime::now_utc().unix_timestamp(),
                    ),
                },
            };
            let reward_title = status
                .reward_title
                .clone()
                .or_else(|| state.record().map(|r| r.reward_title.clone()))
                .unwrap_or_default();
            let submitted_at = state
                .record()
                .map(|r| r.submitted_at.clone())
                .unwrap_or_else(|| {
                    time::OffsetDateTime::now_utc()
                        .format(&time::format_description::well_known::Rfc3339)
                        .unwrap_or_else(|_| "unknown".to_string())
                });
            let record = CompletionRecord {
                user_id: user.clone(),
                code,
                reward_title,
                submitted_at,
            };
            *state = match &*state {
                CompletionState::Submitted(_) => CompletionState::Submitted(record),
                _ => CompletionState::Completed(record),
            };
        }

        if !matches!(&*state, CompletionState::NotCompleted)
            && self.was_submitted(user).await?
        {
            let record = state.record().cloned();
            if let Some(record) = record {
                *state = CompletionState::Submitted(record);
            }
        }

        Ok(state.clone())
    }

    /// Claim: push the completion record to the external sink, at most once
    /// per user ever. Concurrent claims are absorbed into one flight; a
    /// claim after a successful submission is a no-op returning the prior
    /// record; a failed sink write leaves the code valid and retryable.
    pub async fn claim(&self, user: &UserId) -> Result<CompletionRecord, ClientError> {
        let key = FlightKey::new("completion:submit", user.as_str());
        self.claim_flights
            .run(key, || self.claim_inner(user))
            .await
    }

    async fn claim_inner(&self, user: &UserId) -> Result<CompletionRecord, ClientError> {
        let mut state = self.state.lock().await;

        let record = match &*state {
            CompletionState::NotCompleted => {
                return Err(ClientError::Failed {
                    operation: "completion:submit".to_string(),
                    message: "completion has not been reached".to_string(),
                })
            }
            CompletionState::Submitted(record) => return Ok(record.clone()),
            CompletionState::Completed(record) => record.clone(),
        };

        // Durable check-then-set, atomic w.r.t. concurrent claims because
        // the state lock is held across both the check and the write.
        if self.was_submitted(user).await? {
            *state = CompletionState::Submitted(record.clone());
            return Ok(record);
        }

        let outcome = self
            .client
            .execute_once("completion:submit", self.sink.submit(&record))
            .await;

        match outcome {
            Ok(()) => {
                if let Err(err) = self.ledger.mark_submitted(user).await {
                    // The sink write went through; losing the durable flag
                    // risks a duplicate after restart, so make it loud.
                    log::error!(
                        "sink write for '{}' succeeded but the submission ledger failed: {}",
                        user,
                        err
                    );
                }
                log::info!("completion for '{}' submitted to external sink", user);
                *state = CompletionState::Submitted(record.clone());
                Ok(record)
            }
            Err(err) => {
                log::warn!(
                    "completion submission for '{}' failed, code {} remains claimable: {}",
                    user,
                    record.code,
                    err
                );
                Err(err)
            }
        }
    }

    async fn was_submitted(&self, user: &UserId) -> Result<bool, ClientError> {
        self.ledger
            .was_submitted(user)
            .await
            .map_err(|err: BackendError| ClientError::Failed {
                operation: "completion:ledger".to_string(),
                message: err.to_string(),
            })
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

use async_trait::async_trait;

use questline_catalog::{LevelId, PuzzleId, UserId, UserProgress};

use crate::error::BackendError;
use crate::record::{CompletionRecord, CompletionStatus, RewardAvailability};

/// The progress backend — authoritative store of per-user puzzle results.
///
/// All methods classify their failures into the [`BackendError`] taxonomy
/// so the engine's retry layer can act without protocol knowledge.
///
/// ## Authority semantics
///
/// `submit_puzzle_result` returns the server's canonical [`UserProgress`];
/// the engine replaces its local state with that value rather than merging
/// optimistically. Reads may degrade (the engine falls back to a default
/// progress value on failure); writes never do.
///
/// ## Thread safety
///
/// Implementations must be `Send + Sync + 'static` to be shared across
/// async task boundaries behind an `Arc`.
#[async_trait]
pub trait ProgressBackend: Send + Sync + 'static {
    /// Fetch the user's current progress.
    async fn fetch_progress(&self, user: &UserId) -> Result<UserProgress, BackendError>;

    /// Record one puzzle result and return the canonical progress.
    ///
    /// The write is keyed by (user, puzzle) and stars never decrease, so
    /// re-issuing the same submission is safe — the engine relies on this
    /// to retry transient failures.
    async fn submit_puzzle_result(
        &self,
        user: &UserId,
        level: &LevelId,
        puzzle: &PuzzleId,
        stars: u8,
        completed: bool,
    ) -> Result<UserProgress, BackendError>;

    /// Fetch the user's completion status (reconciliation read).
    async fn fetch_completion(&self, user: &UserId) -> Result<CompletionStatus, BackendError>;
}

/// The reward backend — claim state and availability for non-tier rewards.
#[async_trait]
pub trait RewardBackend: Send + Sync + 'static {
    /// Record a virtual reward claim.
    async fn claim_virtual(&self, user: &UserId, reward_id: &str) -> Result<(), BackendError>;

    /// List rewards currently available to the user at the given star total.
    async fn check_availability(
        &self,
        user: &UserId,
        total_stars: u32,
    ) -> Result<RewardAvailability, BackendError>;
}

/// The external completion sink — a fire-and-forget, non-transactional,
/// no-read-back write (e.g. an external ledger).
///
/// The sink cannot be queried for duplicates before writing and a write
/// cannot be rolled back, so the engine never retries `submit` and guards
/// it with a durable at-most-once flag (see [`SubmissionLedger`]).
#[async_trait]
pub trait CompletionSink: Send + Sync + 'static {
    /// Push a completion record. Transport-level success is the only
    /// confirmation available.
    async fn submit(&self, record: &CompletionRecord) -> Result<(), BackendError>;
}

/// Durable at-most-once guard for the external sink, keyed by user.
///
/// Must survive session restarts: the flag is the single source of truth
/// for "this user's completion was already pushed to the sink".
#[async_trait]
pub trait SubmissionLedger: Send + Sync + 'static {
    /// Whether a sink write for this user has already succeeded.
    async fn was_submitted(&self, user: &UserId) -> Result<bool, BackendError>;

    /// Record that a sink write for this user succeeded.
    async fn mark_submitted(&self, user: &UserId) -> Result<(), BackendError>;
}

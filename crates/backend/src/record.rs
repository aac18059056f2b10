use serde::{Deserialize, Serialize};

use questline_catalog::UserId;

/// What the progress backend knows about a user's overall completion.
///
/// Returned by `ProgressBackend::fetch_completion` and used by the engine
/// to reconcile local completion state after a session restart. The remote
/// system is authoritative: an existing `code` is adopted verbatim, never
/// regenerated locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionStatus {
    pub completed: bool,
    pub code: Option<String>,
    pub reward_title: Option<String>,
}

impl CompletionStatus {
    /// Status for a user the backend has no completion record for.
    pub fn not_completed() -> Self {
        CompletionStatus {
            completed: false,
            code: None,
            reward_title: None,
        }
    }
}

/// Kind of a reward a user can unlock, independent of the star-tier ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    Virtual,
    Physical,
}

/// A single reward the reward backend reports as available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardDescriptor {
    /// Stable reward identity — the engine's notification dedup key.
    pub id: String,
    pub kind: RewardKind,
    pub title: String,
}

/// Rewards currently available to a user, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAvailability {
    pub virtual_rewards: Vec<RewardDescriptor>,
    pub physical_rewards: Vec<RewardDescriptor>,
}

/// The record pushed to the external completion sink: user identity, the
/// final reward title, and the generated claim code.
///
/// Created once per user the first time all levels are completed, and
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub user_id: UserId,
    pub code: String,
    pub reward_title: String,
    /// RFC 3339 timestamp of when the record was first issued.
    pub submitted_at: String,
}

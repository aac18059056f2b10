//! Questline catalogs and progress domain types.
//!
//! Static configuration (the level catalog and the reward-tier ladder),
//! the per-user progress model, and the pure reward evaluator. Everything
//! here is synchronous and I/O-free; network concerns live in
//! `questline-backend` and `questline-engine`.

mod error;
mod level;
mod progress;
mod reward;

pub use error::CatalogError;
pub use level::{Level, LevelCatalog, LevelId, PuzzleId, UserId, MAX_STARS_PER_PUZZLE};
pub use progress::{LevelProgress, PuzzleResult, UserProgress};
pub use reward::{RewardCatalog, RewardTier, TierProgress};

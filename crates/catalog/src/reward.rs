//! Reward tier catalog and the pure reward evaluator.
//!
//! Tiers are process-wide immutable configuration: an ascending ladder of
//! star thresholds, each entitling the user to a cumulative discount. The
//! evaluator is pure — no I/O, no state — so the orchestrator can re-run it
//! on every progress change without coordination.

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

// ──────────────────────────────────────────────
// RewardTier
// ──────────────────────────────────────────────

/// A star threshold entitling the user to a specific discount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTier {
    pub stars_required: u32,
    pub discount_percent: u32,
    pub title: String,
}

/// Progress toward the next tier, as a UI-ready pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierProgress {
    /// Percent of the next tier's threshold reached, one decimal place.
    /// 100.0 when there is no next tier.
    pub percent: f64,
    /// Stars still needed for the next tier. 0 when there is no next tier.
    pub stars_remaining: u32,
}

// ──────────────────────────────────────────────
// RewardCatalog
// ──────────────────────────────────────────────

/// Validated ladder of reward tiers, ascending by `stars_required`.
///
/// Duplicate or non-increasing thresholds are a configuration error and are
/// rejected at load time — the "exactly one best tier" invariant holds by
/// construction afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardCatalog {
    tiers: Vec<RewardTier>,
}

impl RewardCatalog {
    pub fn new(tiers: Vec<RewardTier>) -> Result<Self, CatalogError> {
        if tiers.is_empty() {
            return Err(CatalogError::Empty { catalog: "reward" });
        }
        for pair in tiers.windows(2) {
            if pair[1].stars_required <= pair[0].stars_required {
                return Err(CatalogError::ThresholdNotIncreasing {
                    title: pair[1].title.clone(),
                    stars_required: pair[1].stars_required,
                });
            }
        }
        Ok(RewardCatalog { tiers })
    }

    /// All tiers, ascending by threshold.
    pub fn tiers(&self) -> &[RewardTier] {
        &self.tiers
    }

    /// The highest tier whose threshold is within `total_stars`, if any.
    pub fn best_tier(&self, total_stars: u32) -> Option<&RewardTier> {
        self.tiers
            .iter()
            .rev()
            .find(|t| t.stars_required <= total_stars)
    }

    /// The lowest tier whose threshold exceeds `total_stars`, if any.
    pub fn next_tier(&self, total_stars: u32) -> Option<&RewardTier> {
        self.tiers.iter().find(|t| t.stars_required > total_stars)
    }

    /// Progress toward the next tier. Saturates at 100% / 0 remaining once
    /// the top tier is reached.
    pub fn progress_toward_next(&self, total_stars: u32) -> TierProgress {
        match self.next_tier(total_stars) {
            None => TierProgress {
                percent: 100.0,
                stars_remaining: 0,
            },
            Some(next) => {
                let raw = total_stars as f64 / next.stars_required as f64 * 100.0;
                TierProgress {
                    percent: (raw * 10.0).round() / 10.0,
                    stars_remaining: next.stars_required - total_stars,
                }
            }
        }
    }

    /// The tiers unlocked by `total_stars`, ascending.
    pub fn unlocked_tiers(&self, total_stars: u32) -> &[RewardTier] {
        let count = self
            .tiers
            .iter()
            .take_while(|t| t.stars_required <= total_stars)
            .count();
        &self.tiers[..count]
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

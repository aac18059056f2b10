//! User progress types and the catalog-normalization rules that keep them
//! internally consistent.
//!
//! The backend is the authority for raw puzzle results; everything derived
//! from them (per-level totals, completed-level membership, the current
//! level, the grand star total) is recomputed locally against the catalog
//! via [`UserProgress::recompute`]. This means a server payload can never
//! leave the engine holding a progress value that violates its own
//! invariants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::level::{LevelCatalog, LevelId, PuzzleId, UserId};

// ──────────────────────────────────────────────
// PuzzleResult
// ──────────────────────────────────────────────

/// Outcome of a single puzzle attempt. Written once per puzzle per user
/// (single-attempt rule enforced upstream); stars never decrease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleResult {
    pub puzzle_id: PuzzleId,
    /// 0..=5 stars.
    pub stars: u8,
    pub completed: bool,
}

// ──────────────────────────────────────────────
// LevelProgress
// ──────────────────────────────────────────────

/// Progress within a single level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub level_id: LevelId,
    pub total_stars: u32,
    /// True only when every puzzle of the level has a result.
    pub completed: bool,
    pub puzzles: BTreeMap<PuzzleId, PuzzleResult>,
}

impl LevelProgress {
    /// An empty progress entry for a level.
    pub fn empty(level_id: LevelId) -> Self {
        LevelProgress {
            level_id,
            total_stars: 0,
            completed: false,
            puzzles: BTreeMap::new(),
        }
    }
}

// ──────────────────────────────────────────────
// UserProgress
// ──────────────────────────────────────────────

/// Canonical per-user progress state. Owned exclusively by the engine's
/// progress store for the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: UserId,
    pub current_level: LevelId,
    /// Completed levels in catalog order.
    pub completed_levels: Vec<LevelId>,
    pub total_stars: u32,
    pub levels: BTreeMap<LevelId, LevelProgress>,
}

impl UserProgress {
    /// The degraded-read fallback: first level, zero stars, nothing completed.
    pub fn default_for(user_id: UserId, catalog: &LevelCatalog) -> Self {
        UserProgress {
            user_id,
            current_level: catalog.first_level().id.clone(),
            completed_levels: Vec::new(),
            total_stars: 0,
            levels: BTreeMap::new(),
        }
    }

    /// Recompute every derived field from the per-puzzle results.
    ///
    /// - `LevelProgress.total_stars` = sum of its puzzle stars
    /// - `LevelProgress.completed` = every catalog puzzle has a result
    /// - `completed_levels` = exactly the completed levels, in catalog order
    /// - `total_stars` = sum over levels
    /// - `current_level` = first catalog level not yet completed, or the
    ///   last level once everything is done
    ///
    /// Unknown levels or puzzles in the payload (not present in the catalog)
    /// are dropped rather than trusted.
    pub fn recompute(&mut self, catalog: &LevelCatalog) {
        self.levels.retain(|id, _| catalog.level(id).is_some());

        let mut completed = Vec::new();
        let mut total = 0u32;

        for level in catalog.levels() {
            let Some(lp) = self.levels.get_mut(&level.id) else {
                continue;
            };
            lp.puzzles.retain(|pid, _| level.puzzles.contains(pid));
            lp.total_stars = lp.puzzles.values().map(|r| r.stars as u32).sum();
            lp.completed = level.puzzles.iter().all(|p| lp.puzzles.contains_key(p));
            total += lp.total_stars;
            if lp.completed {
                completed.push(level.id.clone());
            }
        }

        self.total_stars = total;
        self.completed_levels = completed;
        self.current_level = catalog
            .levels()
            .iter()
            .find(|l| !self.completed_levels.contains(&l.id))
            .map(|l| l.id.clone())
            .unwrap_or_else(|| {
                // All levels complete: current stays pinned to the last one.
                catalog.levels()[catalog.len() - 1].id.clone()
            });
    }

    /// Whether every catalog level is completed.
    pub fn all_levels_complete(&self, catalog: &LevelCatalog) -> bool {
        catalog
            .levels()
            .iter()
            .all(|l| self.completed_levels.contains(&l.id))
    }

    /// Whether a level is currently playable under the strict unlock order:
    /// the first level always, any other iff its predecessor is completed.
    pub fn is_unlocked(&self, level_id: &LevelId, catalog: &LevelCatalog) -> bool {
        let levels = catalog.levels();
        match levels.iter().position(|l| &l.id == level_id) {
            None => false,
            Some(0) => true,
            Some(pos) => self.completed_levels.contains(&levels[pos - 1].id),
        }
    }

    /// Levels in `self.completed_levels` that are not in `before` — the edge
    /// set of a progress transition.
    pub fn newly_completed_since(&self, before: &UserProgress) -> Vec<LevelId> {
        self.completed_levels
            .iter()
            .filter(|id| !before.completed_levels.contains(id))
            .cloned()
            .collect()
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

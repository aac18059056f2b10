//! Level catalog — the static, ordered set of levels and their puzzles.
//!
//! The catalog is loaded once per process, validated up front, and treated
//! as immutable for the whole session. Unlock order is strictly the catalog
//! declaration order: level *n* is playable iff level *n-1* is completed
//! (the first level is always playable).

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Stars a single puzzle can award at most.
pub const MAX_STARS_PER_PUZZLE: u8 = 5;

// ──────────────────────────────────────────────
// Identifiers
// ──────────────────────────────────────────────

/// Opaque, externally issued user identifier. All engine state is scoped by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a level in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelId(pub String);

impl LevelId {
    pub fn new(id: impl Into<String>) -> Self {
        LevelId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LevelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a puzzle within a level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PuzzleId(pub String);

impl PuzzleId {
    pub fn new(id: impl Into<String>) -> Self {
        PuzzleId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PuzzleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ──────────────────────────────────────────────
// Level
// ──────────────────────────────────────────────

/// A single level: an ordered slot in the onboarding sequence with a fixed
/// set of puzzles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub id: LevelId,
    /// Position in the unlock sequence. Strictly increasing across the catalog.
    pub order: u32,
    /// Total stars obtainable in this level (5 per puzzle).
    pub max_stars: u32,
    pub puzzles: Vec<PuzzleId>,
}

// ──────────────────────────────────────────────
// LevelCatalog
// ──────────────────────────────────────────────

/// Validated, immutable collection of levels in unlock order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelCatalog {
    levels: Vec<Level>,
}

impl LevelCatalog {
    /// Validate and construct a catalog.
    ///
    /// Rejects empty catalogs, duplicate level/puzzle ids, non-increasing
    /// orders, puzzle-less levels, and `max_stars` values that don't match
    /// the declared puzzle count. A misconfigured catalog is a load-time
    /// error, never a runtime condition.
    pub fn new(levels: Vec<Level>) -> Result<Self, CatalogError> {
        if levels.is_empty() {
            return Err(CatalogError::Empty { catalog: "level" });
        }

        let mut seen_levels = std::collections::HashSet::new();
        let mut seen_puzzles = std::collections::HashSet::new();
        let mut last_order: Option<u32> = None;

        for level in &levels {
            if !seen_levels.insert(level.id.clone()) {
                return Err(CatalogError::DuplicateLevel {
                    level_id: level.id.0.clone(),
                });
            }
            if let Some(prev) = last_order {
                if level.order <= prev {
                    return Err(CatalogError::OrderNotIncreasing {
                        level_id: level.id.0.clone(),
                        order: level.order,
                    });
                }
            }
            last_order = Some(level.order);

            if level.puzzles.is_empty() {
                return Err(CatalogError::EmptyLevel {
                    level_id: level.id.0.clone(),
                });
            }
            let expected = level.puzzles.len() as u32 * MAX_STARS_PER_PUZZLE as u32;
            if level.max_stars != expected {
                return Err(CatalogError::MaxStarsMismatch {
                    level_id: level.id.0.clone(),
                    declared: level.max_stars,
                    expected,
                });
            }
            for puzzle in &level.puzzles {
                if !seen_puzzles.insert(puzzle.clone()) {
                    return Err(CatalogError::DuplicatePuzzle {
                        puzzle_id: puzzle.0.clone(),
                    });
                }
            }
        }

        Ok(LevelCatalog { levels })
    }

    /// All levels in unlock order.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// The first level — always playable.
    pub fn first_level(&self) -> &Level {
        // Invariant: the catalog is never empty (checked in new()).
        &self.levels[0]
    }

    /// Look up a level by id.
    pub fn level(&self, id: &LevelId) -> Option<&Level> {
        self.levels.iter().find(|l| &l.id == id)
    }

    /// The level after `id` in catalog order, if any.
    pub fn next_after(&self, id: &LevelId) -> Option<&Level> {
        let pos = self.levels.iter().position(|l| &l.id == id)?;
        self.levels.get(pos + 1)
    }

    /// Whether `id` is the last level in the catalog.
    pub fn is_last(&self, id: &LevelId) -> bool {
        self.levels.last().map(|l| &l.id == id).unwrap_or(false)
    }

    /// Total number of levels.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

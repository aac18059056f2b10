use std::fmt;

/// Errors produced while validating a level or reward catalog at load time.
///
/// Catalogs are static session configuration; a malformed catalog is a
/// deployment mistake, so these are rejected up front rather than handled
/// at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog contains no entries.
    Empty { catalog: &'static str },
    /// Two levels share the same id.
    DuplicateLevel { level_id: String },
    /// A puzzle id appears in more than one level.
    DuplicatePuzzle { puzzle_id: String },
    /// Level orders must be strictly increasing in declaration order.
    OrderNotIncreasing { level_id: String, order: u32 },
    /// A level declares no puzzles.
    EmptyLevel { level_id: String },
    /// A level's max_stars doesn't match 5 stars per declared puzzle.
    MaxStarsMismatch {
        level_id: String,
        declared: u32,
        expected: u32,
    },
    /// Reward tier thresholds must be strictly increasing.
    ThresholdNotIncreasing { title: String, stars_required: u32 },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Empty { catalog } => {
                write!(f, "{} catalog is empty", catalog)
            }
            CatalogError::DuplicateLevel { level_id } => {
                write!(f, "duplicate level id '{}'", level_id)
            }
            CatalogError::DuplicatePuzzle { puzzle_id } => {
                write!(f, "puzzle '{}' appears in more than one level", puzzle_id)
            }
            CatalogError::OrderNotIncreasing { level_id, order } => {
                write!(
                    f,
                    "level '{}' order {} is not strictly increasing",
                    level_id, order
                )
            }
            CatalogError::EmptyLevel { level_id } => {
                write!(f, "level '{}' declares no puzzles", level_id)
            }
            CatalogError::MaxStarsMismatch {
                level_id,
                declared,
                expected,
            } => {
                write!(
                    f,
                    "level '{}' declares max_stars {} but its puzzles allow {}",
                    level_id, declared, expected
                )
            }
            CatalogError::ThresholdNotIncreasing {
                title,
                stars_required,
            } => {
                write!(
                    f,
                    "reward tier '{}' threshold {} is not strictly increasing",
                    title, stars_required
                )
            }
        }
    }
}

impl std::error::Error for CatalogError {}

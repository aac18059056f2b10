//! Engine error types.
//!
//! Two layers: [`ClientError`] is what the retry/coalescing machinery
//! surfaces after classification and bounded retries; [`EngineError`] is
//! the orchestrator-facing union of client failures and local rule
//! violations. Both are `Clone` so coalesced joiners can share a failure
//! outcome verbatim.

use std::fmt;

use questline_catalog::{LevelId, PuzzleId, UserId};

// ──────────────────────────────────────────────
// ClientError
// ──────────────────────────────────────────────

/// Outcome of a remote operation after retry classification.
///
/// One value per failed logical operation, regardless of how many attempts
/// were made — callers never see per-attempt noise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Rate-limit retries exhausted.
    RateLimited { operation: String, attempts: u32 },
    /// Transient-failure retries exhausted.
    Unavailable { operation: String, attempts: u32 },
    /// The server rejected a write due to stale or invalid state. Not retried.
    Conflict { operation: String, message: String },
    /// Non-retryable failure, propagated on the first attempt.
    Fatal { operation: String, message: String },
    /// Any other failure mode (abandoned flight, guard violation). Not retried.
    Failed { operation: String, message: String },
}

impl ClientError {
    /// The logical operation name this failure belongs to.
    pub fn operation(&self) -> &str {
        match self {
            ClientError::RateLimited { operation, .. }
            | ClientError::Unavailable { operation, .. }
            | ClientError::Conflict { operation, .. }
            | ClientError::Fatal { operation, .. }
            | ClientError::Failed { operation, .. } => operation,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::RateLimited {
                operation,
                attempts,
            } => {
                write!(
                    f,
                    "'{}' rate limited after {} attempts",
                    operation, attempts
                )
            }
            ClientError::Unavailable {
                operation,
                attempts,
            } => {
                write!(
                    f,
                    "'{}' unavailable after {} attempts",
                    operation, attempts
                )
            }
            ClientError::Conflict { operation, message } => {
                write!(f, "'{}' rejected by server: {}", operation, message)
            }
            ClientError::Fatal { operation, message } => {
                write!(f, "'{}' failed fatally: {}", operation, message)
            }
            ClientError::Failed { operation, message } => {
                write!(f, "'{}' failed: {}", operation, message)
            }
        }
    }
}

impl std::error::Error for ClientError {}

// ──────────────────────────────────────────────
// EngineError
// ──────────────────────────────────────────────

/// Orchestrator-facing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No user session is active.
    NoActiveSession,
    /// The operation targeted a user other than the active session's.
    StaleSession { user: UserId },
    /// The level is not in the catalog.
    UnknownLevel { level_id: LevelId },
    /// The puzzle does not belong to the given level.
    UnknownPuzzle {
        level_id: LevelId,
        puzzle_id: PuzzleId,
    },
    /// The level is still locked under the catalog unlock order.
    LevelLocked { level_id: LevelId },
    /// Star value outside 0..=5.
    InvalidStars { stars: u8 },
    /// Completion was claimed before all levels were complete.
    NotCompleted,
    /// A remote operation failed after classification and bounded retries.
    Client(ClientError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NoActiveSession => write!(f, "no active user session"),
            EngineError::StaleSession { user } => {
                write!(f, "session for '{}' is no longer active", user)
            }
            EngineError::UnknownLevel { level_id } => {
                write!(f, "level '{}' is not in the catalog", level_id)
            }
            EngineError::UnknownPuzzle {
                level_id,
                puzzle_id,
            } => {
                write!(
                    f,
                    "puzzle '{}' does not belong to level '{}'",
                    puzzle_id, level_id
                )
            }
            EngineError::LevelLocked { level_id } => {
                write!(f, "level '{}' is locked", level_id)
            }
            EngineError::InvalidStars { stars } => {
                write!(f, "star value {} is outside 0..=5", stars)
            }
            EngineError::NotCompleted => {
                write!(f, "completion claimed before all levels were complete")
            }
            EngineError::Client(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ClientError> for EngineError {
    fn from(err: ClientError) -> Self {
        EngineError::Client(err)
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_display() {
        let err = ClientError::Unavailable {
            operation: "progress:load".to_string(),
            attempts: 4,
        };
        assert_eq!(err.to_string(), "'progress:load' unavailable after 4 attempts");

        let err = ClientError::RateLimited {
            operation: "rewards:availability".to_string(),
            attempts: 4,
        };
        assert_eq!(
            err.to_string(),
            "'rewards:availability' rate limited after 4 attempts"
        );
    }

    #[test]
    fn engine_error_display() {
        let err = EngineError::LevelLocked {
            level_id: LevelId::new("l3"),
        };
        assert_eq!(err.to_string(), "level 'l3' is locked");

        let err = EngineError::Client(ClientError::Conflict {
            operation: "progress:record".to_string(),
            message: "stale state".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "'progress:record' rejected by server: stale state"
        );
    }
}

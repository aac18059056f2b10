//! Canonical in-memory progress state for the active user session.
//!
//! The store is the single writer of `UserProgress`. Reads degrade: a
//! failed load falls back to a default progress value (first level, zero
//! stars) so the session stays usable while the backend is flaky. Writes
//! never degrade: a failed puzzle submission leaves local state untouched
//! and surfaces the failure unchanged — the server is the authority, and
//! the store never applies an optimistic local merge.

use std::sync::{Arc, Mutex};

use questline_backend::{CompletionStatus, ProgressBackend};
use questline_catalog::{LevelCatalog, LevelId, PuzzleId, UserId, UserProgress};

use crate::error::{ClientError, EngineError};
use crate::retry::RetryingClient;
use crate::single_flight::{FlightKey, SingleFlight};

/// Outcome of a successful puzzle submission, with the level-completion
/// edges detected by comparing old and new completed-level membership.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub progress: UserProgress,
    /// Stars the user had before this update was acknowledged.
    pub previous_total_stars: u32,
    /// Levels that became complete in this update, in catalog order.
    pub newly_completed: Vec<LevelId>,
    /// True exactly once: the update that completed the final level.
    pub all_levels_complete_edge: bool,
}

/// Owns `UserProgress` for the bound user and funnels every remote call
/// through single-flight coalescing plus bounded retries.
pub struct ProgressStore {
    catalog: Arc<LevelCatalog>,
    backend: Arc<dyn ProgressBackend>,
    client: RetryingClient,
    progress_flights: SingleFlight<UserProgress>,
    completion_flights: SingleFlight<CompletionStatus>,
    /// (bound user, canonical state). A load or write whose user no longer
    /// matches the bound user is discarded instead of applied.
    state: Mutex<(Option<UserId>, Option<UserProgress>)>,
}

impl ProgressStore {
    pub fn new(
        catalog: Arc<LevelCatalog>,
        backend: Arc<dyn ProgressBackend>,
        client: RetryingClient,
    ) -> Self {
        ProgressStore {
            catalog,
            backend,
            client,
            progress_flights: SingleFlight::new(),
            completion_flights: SingleFlight::new(),
            state: Mutex::new((None, None)),
        }
    }

    /// Bind the store to a user, discarding any previous user's state.
    /// Responses from flights started before rebinding will not be applied.
    pub fn bind(&self, user: UserId) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = (Some(user), None);
    }

    /// Unbind and clear all local state.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = (None, None);
    }

    /// The current canonical progress, if loaded.
    pub fn current(&self) -> Option<UserProgress> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .1
            .clone()
    }

    /// Load the user's progress. Concurrent loads for the same user
    /// coalesce into one request; a failed load degrades to the default
    /// progress value rather than failing the caller.
    pub async fn load(&self, user: &UserId) -> UserProgress {
        let key = FlightKey::new("progress:load", user.as_str());
        let backend = self.backend.clone();
        let client = self.client.clone();
        let flight_user = user.clone();

        let outcome = self
            .progress_flights
            .run(key, || async move {
                client
                    .execute("progress:load", || backend.fetch_progress(&flight_user))
                    .await
            })
            .await;

        let mut progress = match outcome {
            Ok(progress) => progress,
            Err(err) => {
                log::warn!(
                    "progress load for '{}' degraded to defaults: {}",
                    user,
                    err
                );
                UserProgress::default_for(user.clone(), &self.catalog)
            }
        };
        progress.recompute(&self.catalog);
        self.apply(user, progress.clone());
        progress
    }

    /// Submit one puzzle result and adopt the server's canonical progress.
    ///
    /// Identical concurrent submissions coalesce; distinct operations for
    /// the same user are serialized by the scope lock, never interleaved
    /// with a concurrent load. On failure, local state is untouched.
    pub async fn record_puzzle_result(
        &self,
        user: &UserId,
        level_id: &LevelId,
        puzzle_id: &PuzzleId,
        stars: u8,
        completed: bool,
    ) -> Result<ProgressUpdate, EngineError> {
        self.validate(user, level_id, puzzle_id, stars)?;

        let before = self
            .current()
            .unwrap_or_else(|| UserProgress::default_for(user.clone(), &self.catalog));

        let key = FlightKey::new(
            format!("progress:record:{}:{}:{}", level_id, puzzle_id, stars),
            user.as_str(),
        );
        let backend = self.backend.clone();
        let client = self.client.clone();
        let flight_user = user.clone();
        let flight_level = level_id.clone();
        let flight_puzzle = puzzle_id.clone();

        let mut progress = self
            .progress_flights
            .run(key, || async move {
                client
                    .execute("progress:record", || {
                        backend.submit_puzzle_result(
                            &flight_user,
                            &flight_level,
                            &flight_puzzle,
                            stars,
                            completed,
                        )
                    })
                    .await
            })
            .await
            .map_err(EngineError::Client)?;

        progress.recompute(&self.catalog);
        let newly_completed = progress.newly_completed_since(&before);
        let all_levels_complete_edge = !before.all_levels_complete(&self.catalog)
            && progress.all_levels_complete(&self.catalog);

        self.apply(user, progress.clone());

        Ok(ProgressUpdate {
            progress,
            previous_total_stars: before.total_stars,
            newly_completed,
            all_levels_complete_edge,
        })
    }

    /// Fetch the user's completion status (reconciliation read). Coalesced
    /// and retried; degradation policy is left to the caller.
    pub async fn fetch_completion(&self, user: &UserId) -> Result<CompletionStatus, ClientError> {
        let key = FlightKey::new("completion:load", user.as_str());
        let backend = self.backend.clone();
        let client = self.client.clone();
        let flight_user = user.clone();

        self.completion_flights
            .run(key, || async move {
                client
                    .execute("completion:load", || {
                        backend.fetch_completion(&flight_user)
                    })
                    .await
            })
            .await
    }

    /// Apply new canonical state, unless the store was rebound to a
    /// different user while the response was in flight.
    fn apply(&self, user: &UserId, progress: UserProgress) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &state.0 {
            Some(bound) if bound == user => state.1 = Some(progress),
            _ => {
                log::debug!(
                    "discarding stale progress response for '{}' (session changed)",
                    user
                );
            }
        }
    }

    fn validate(
        &self,
        user: &UserId,
        level_id: &LevelId,
        puzzle_id: &PuzzleId,
        stars: u8,
    ) -> Result<(), EngineError> {
        if stars > questline_catalog::MAX_STARS_PER_PUZZLE {
            return Err(EngineError::InvalidStars { stars });
        }
        let level = self
            .catalog
            .level(level_id)
            .ok_or_else(|| EngineError::UnknownLevel {
                level_id: level_id.clone(),
            })?;
        if !level.puzzles.contains(puzzle_id) {
            return Err(EngineError::UnknownPuzzle {
                level_id: level_id.clone(),
                puzzle_id: puzzle_id.clone(),
            });
        }
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &state.0 {
            None => return Err(EngineError::NoActiveSession),
            Some(bound) if bound != user => {
                return Err(EngineError::StaleSession { user: user.clone() })
            }
            Some(_) => {}
        }
        // Unlock check runs against local state when we have it; a missing
        // load leaves enforcement to the server.
        if let Some(progress) = &state.1 {
            if !progress.is_unlocked(level_id, &self.catalog) {
                return Err(EngineError::LevelLocked {
                    level_id: level_id.clone(),
                });
            }
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

//! Per-user session orchestration.
//!
//! Composes the progress store, reward evaluator, notification ledger, and
//! completion submitter under a single user-scoped lifecycle. All mutating
//! paths funnel through the store's single-flight discipline; the
//! orchestrator's own job is sequencing — on every progress change it
//! re-runs the evaluator, diffs the notification ledger, and drives the
//! completion edge — and publishing a consistent observable snapshot.
//!
//! Stale effects are discarded twice over: the store rejects responses for
//! a user it is no longer bound to, and a session generation counter stops
//! notification or snapshot effects from a superseded session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use questline_backend::{
    CompletionRecord, CompletionSink, ProgressBackend, RewardAvailability, RewardBackend,
    SubmissionLedger,
};
use questline_catalog::{
    LevelCatalog, LevelId, PuzzleId, RewardCatalog, RewardTier, TierProgress, UserId,
    UserProgress,
};

use crate::completion::{CompletionState, CompletionSubmitter};
use crate::error::EngineError;
use crate::notifications::{tier_unlock_candidates, Notification, NotificationLedger, RewardCandidate};
use crate::progress_store::{ProgressStore, ProgressUpdate};
use crate::retry::{RetryPolicy, RetryingClient};

// ──────────────────────────────────────────────
// EngineSnapshot
// ──────────────────────────────────────────────

/// Consistent, UI-facing view of the active session. Published on a watch
/// channel after every state change.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub user: Option<UserId>,
    pub progress: Option<UserProgress>,
    pub best_tier: Option<RewardTier>,
    pub next_tier: Option<RewardTier>,
    pub tier_progress: Option<TierProgress>,
    pub notifications: Vec<Notification>,
    pub unread_notifications: usize,
    pub completion: CompletionState,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        EngineSnapshot {
            user: None,
            progress: None,
            best_tier: None,
            next_tier: None,
            tier_progress: None,
            notifications: Vec::new(),
            unread_notifications: 0,
            completion: CompletionState::NotCompleted,
        }
    }
}

// ──────────────────────────────────────────────
// Orchestrator
// ──────────────────────────────────────────────

/// The engine's composition root, scoped to one active user at a time.
pub struct Orchestrator {
    levels: Arc<LevelCatalog>,
    rewards: Arc<RewardCatalog>,
    reward_backend: Arc<dyn RewardBackend>,
    store: ProgressStore,
    notifications: Mutex<NotificationLedger>,
    submitter: CompletionSubmitter,
    client: RetryingClient,
    /// Last initialized user — the re-entrant `start` guard.
    session: Mutex<Option<UserId>>,
    /// Bumped on every session change; async effects carry the generation
    /// they started under and are discarded when it no longer matches.
    generation: AtomicU64,
    snapshot_tx: watch::Sender<EngineSnapshot>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        levels: Arc<LevelCatalog>,
        rewards: Arc<RewardCatalog>,
        progress_backend: Arc<dyn ProgressBackend>,
        reward_backend: Arc<dyn RewardBackend>,
        sink: Arc<dyn CompletionSink>,
        submission_ledger: Arc<dyn SubmissionLedger>,
        policy: RetryPolicy,
    ) -> Self {
        let client = RetryingClient::new(policy);
        let (snapshot_tx, _) = watch::channel(EngineSnapshot::default());
        Orchestrator {
            store: ProgressStore::new(levels.clone(), progress_backend, client.clone()),
            submitter: CompletionSubmitter::new(sink, submission_ledger, client.clone()),
            levels,
            rewards,
            reward_backend,
            notifications: Mutex::new(NotificationLedger::new()),
            client,
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
            snapshot_tx,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Initialize a session for `user`: load progress, evaluate rewards,
    /// reconcile completion. Re-entrant for the already-active user (a
    /// no-op); for a different user, fully resets all component state
    /// first.
    pub async fn start(&self, user: UserId) -> Result<EngineSnapshot, EngineError> {
        // Marker, generation, and the synchronous resets move together
        // under the session lock: a concurrent start for another user sees
        // either all of them or none, so the marker can never point at one
        // user while another user's generation is current.
        let generation = {
            let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
            if session.as_ref() == Some(&user) {
                log::debug!("session for '{}' already initialized", user);
                return Ok(self.snapshot());
            }
            *session = Some(user.clone());
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.store.bind(user.clone());
            self.notifications
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .reset();
            generation
        };
        log::info!("starting session for '{}'", user);

        self.submitter.reset().await;
        self.publish(generation).await;

        let progress = self.store.load(&user).await;
        self.evaluate_rewards(generation, &user, None, &progress).await;

        // Reconciliation: the backend is authoritative for whether
        // completion already happened (e.g. after a reload).
        match self.store.fetch_completion(&user).await {
            Ok(status) if self.is_current(generation) => {
                if !status.completed && progress.all_levels_complete(&self.levels) {
                    let title = self.final_reward_title(progress.total_stars);
                    self.submitter.mark_completed(&user, &title).await;
                }
                if let Err(err) = self.submitter.reconcile(&user, &status).await {
                    log::warn!("completion reconciliation for '{}' failed: {}", user, err);
                }
            }
            Ok(_) => {
                log::debug!("discarding completion status for superseded session");
            }
            Err(err) => {
                // Degraded read: treat as not-completed-yet rather than
                // failing session start.
                log::warn!(
                    "completion status for '{}' unavailable, assuming none: {}",
                    user,
                    err
                );
            }
        }

        self.publish(generation).await;
        Ok(self.snapshot())
    }

    /// Tear down the active session, if any. Also the reaction to losing
    /// auth-session validity ("switch to no user").
    pub async fn stop(&self) {
        let previous = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(user) = previous else {
            return;
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        log::info!("stopping session for '{}'", user);

        self.store.reset();
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
        self.submitter.reset().await;
        self.snapshot_tx.send_replace(EngineSnapshot::default());
    }

    /// Switch the active session to another user. Equivalent to `start`:
    /// stale state from the previous user never leaks into the new one.
    pub async fn switch_user(&self, user: UserId) -> Result<EngineSnapshot, EngineError> {
        self.start(user).await
    }

    // ── Progress ─────────────────────────────────────────────────────────

    /// Record a puzzle result and drive the downstream pipeline: reward
    /// re-evaluation, notification diff, and — exactly once, on the edge —
    /// the transition into the completed state.
    pub async fn record_puzzle_result(
        &self,
        level_id: &LevelId,
        puzzle_id: &PuzzleId,
        stars: u8,
        completed: bool,
    ) -> Result<ProgressUpdate, EngineError> {
        let user = self.active_user().ok_or(EngineError::NoActiveSession)?;
        let generation = self.generation.load(Ordering::SeqCst);

        let update = self
            .store
            .record_puzzle_result(&user, level_id, puzzle_id, stars, completed)
            .await?;

        self.evaluate_rewards(
            generation,
            &user,
            Some(update.previous_total_stars),
            &update.progress,
        )
        .await;

        if update.all_levels_complete_edge && self.is_current(generation) {
            let title = self.final_reward_title(update.progress.total_stars);
            self.submitter.mark_completed(&user, &title).await;
        }

        self.publish(generation).await;
        Ok(update)
    }

    // ── Completion ───────────────────────────────────────────────────────

    /// Explicit user claim: push the completion record to the external
    /// sink. At most one sink write per user, ever; repeated claims return
    /// the prior success.
    pub async fn claim_completion(&self) -> Result<CompletionRecord, EngineError> {
        let user = self.active_user().ok_or(EngineError::NoActiveSession)?;
        let generation = self.generation.load(Ordering::SeqCst);

        if self.submitter.current_state().await == CompletionState::NotCompleted {
            return Err(EngineError::NotCompleted);
        }
        let result = self.submitter.claim(&user).await;
        self.publish(generation).await;
        Ok(result?)
    }

    // ── Rewards & notifications ──────────────────────────────────────────

    /// Claim a reward with the reward backend, then mark the matching
    /// notification claimed. The backend's claim record is the source of
    /// truth; the ledger's claimed flag is derived from it.
    pub async fn claim_reward(&self, reward_identity: &str) -> Result<(), EngineError> {
        let user = self.active_user().ok_or(EngineError::NoActiveSession)?;
        let generation = self.generation.load(Ordering::SeqCst);

        self.client
            .execute("rewards:claim", || {
                self.reward_backend.claim_virtual(&user, reward_identity)
            })
            .await
            .map_err(EngineError::Client)?;

        if self.is_current(generation) {
            let mut ledger = self.notifications.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(id) = ledger.find_by_reward(reward_identity).map(|n| n.id) {
                ledger.claim(id);
            }
        }
        self.publish(generation).await;
        Ok(())
    }

    pub async fn mark_notification_read(&self, id: u64) -> bool {
        let generation = self.generation.load(Ordering::SeqCst);
        let changed = self
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .mark_read(id);
        self.publish(generation).await;
        changed
    }

    pub async fn mark_all_notifications_read(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .mark_all_read();
        self.publish(generation).await;
    }

    pub async fn remove_notification(&self, id: u64) -> bool {
        let generation = self.generation.load(Ordering::SeqCst);
        let changed = self
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        self.publish(generation).await;
        changed
    }

    // ── Observation ──────────────────────────────────────────────────────

    /// The current observable state.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn active_user(&self) -> Option<UserId> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Re-run the evaluator against new progress, refresh backend reward
    /// availability (degrading to none on failure), and diff the ledger.
    /// Tier unlocks are emitted before backend rewards, each in detection
    /// order.
    async fn evaluate_rewards(
        &self,
        generation: u64,
        user: &UserId,
        previous_total_stars: Option<u32>,
        progress: &UserProgress,
    ) {
        let previous_best =
            previous_total_stars.and_then(|stars| self.rewards.best_tier(stars).cloned());
        let new_best = self.rewards.best_tier(progress.total_stars).cloned();
        let mut candidates =
            tier_unlock_candidates(&self.rewards, previous_best.as_ref(), new_best.as_ref());

        let availability = match self
            .client
            .execute("rewards:availability", || {
                self.reward_backend
                    .check_availability(user, progress.total_stars)
            })
            .await
        {
            Ok(availability) => availability,
            Err(err) => {
                log::warn!("reward availability for '{}' unavailable: {}", user, err);
                RewardAvailability::default()
            }
        };
        for descriptor in availability
            .virtual_rewards
            .iter()
            .chain(availability.physical_rewards.iter())
        {
            candidates.push(RewardCandidate {
                identity: descriptor.id.clone(),
                title: descriptor.title.clone(),
            });
        }

        if !self.is_current(generation) {
            log::debug!("discarding reward evaluation for superseded session");
            return;
        }
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .diff_and_emit(&candidates);
    }

    async fn publish(&self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        let progress = self.store.current();
        let (best_tier, next_tier, tier_progress) = match &progress {
            Some(p) => (
                self.rewards.best_tier(p.total_stars).cloned(),
                self.rewards.next_tier(p.total_stars).cloned(),
                Some(self.rewards.progress_toward_next(p.total_stars)),
            ),
            None => (None, None, None),
        };
        let (notifications, unread_notifications) = {
            let ledger = self.notifications.lock().unwrap_or_else(|e| e.into_inner());
            (ledger.notifications().to_vec(), ledger.unread_count())
        };
        let snapshot = EngineSnapshot {
            user: self.active_user(),
            progress,
            best_tier,
            next_tier,
            tier_progress,
            notifications,
            unread_notifications,
            completion: self.submitter.current_state().await,
        };
        // Publish only if the session is still current; a superseded
        // session's effects must not clobber the new user's view.
        if self.is_current(generation) {
            self.snapshot_tx.send_replace(snapshot);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn final_reward_title(&self, total_stars: u32) -> String {
        self.rewards
            .best_tier(total_stars)
            .map(|t| t.title.clone())
            .unwrap_or_else(|| "Onboarding complete".to_string())
    }
}

//! Progress & reward orchestration engine.
//!
//! Coordinates a user's journey through the level catalog against slow,
//! unreliable backends: coalesced and retried progress reads/writes,
//! pure reward-tier evaluation, exactly-once unlock notifications, and an
//! at-most-once external completion submission.
//!
//! Component stack, leaf first:
//! - [`RetryingClient`] — bounded exponential-backoff retry with jitter
//! - [`SingleFlight`] — one physical request per logical key
//! - [`ProgressStore`] — canonical per-user progress state
//! - [`NotificationLedger`] — exactly-once reward surfacing
//! - [`CompletionSubmitter`] — at-most-once external sink write
//! - [`Orchestrator`] — session lifecycle composing the above

pub mod completion;
pub mod error;
pub mod notifications;
pub mod orchestrator;
pub mod progress_store;
pub mod retry;
pub mod single_flight;

pub use completion::{generate_code, CompletionState, CompletionSubmitter};
pub use error::{ClientError, EngineError};
pub use notifications::{
    tier_unlock_candidates, Notification, NotificationKind, NotificationLedger, RewardCandidate,
};
pub use orchestrator::{EngineSnapshot, Orchestrator};
pub use progress_store::{ProgressStore, ProgressUpdate};
pub use retry::{RetryPolicy, RetryingClient};
pub use single_flight::{FlightKey, SingleFlight};

// ──────────────────────────────────────────────
// Integration tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod integration_tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use questline_backend::{
        BackendError, CompletionRecord, CompletionSink, CompletionStatus, MemorySubmissionLedger,
        ProgressBackend, RewardAvailability, RewardBackend, RewardDescriptor, RewardKind,
    };
    use questline_catalog::{
        Level, LevelCatalog, LevelId, LevelProgress, PuzzleId, PuzzleResult, RewardCatalog,
        RewardTier, UserId, UserProgress,
    };

    fn levels() -> Arc<LevelCatalog> {
        Arc::new(
            LevelCatalog::new(vec![
                Level {
                    id: LevelId::new("intro"),
                    order: 1,
                    max_stars: 5,
                    puzzles: vec![PuzzleId::new("p1")],
                },
                Level {
                    id: LevelId::new("advanced"),
                    order: 2,
                    max_stars: 5,
                    puzzles: vec![PuzzleId::new("p2")],
                },
            ])
            .unwrap(),
        )
    }

    fn tiers() -> Arc<RewardCatalog> {
        Arc::new(
            RewardCatalog::new(vec![
                RewardTier {
                    stars_required: 5,
                    discount_percent: 3,
                    title: "Starter".to_string(),
                },
                RewardTier {
                    stars_required: 10,
                    discount_percent: 8,
                    title: "Gold".to_string(),
                },
            ])
            .unwrap(),
        )
    }

    /// One scripted backend standing in for all three collaborators.
    struct FakeBackend {
        catalog: Arc<LevelCatalog>,
        results: Mutex<BTreeMap<(UserId, PuzzleId), (LevelId, PuzzleResult)>>,
        completion: Mutex<BTreeMap<UserId, CompletionStatus>>,
        badges: Mutex<Vec<RewardDescriptor>>,
        fetch_calls: AtomicU32,
        sink_writes: AtomicU32,
        fail_fetch: Mutex<Option<BackendError>>,
        fail_submit: Mutex<Option<BackendError>>,
    }

    impl FakeBackend {
        fn new(catalog: Arc<LevelCatalog>) -> Self {
            FakeBackend {
                catalog,
                results: Mutex::new(BTreeMap::new()),
                completion: Mutex::new(BTreeMap::new()),
                badges: Mutex::new(Vec::new()),
                fetch_calls: AtomicU32::new(0),
                sink_writes: AtomicU32::new(0),
                fail_fetch: Mutex::new(None),
                fail_submit: Mutex::new(None),
            }
        }

        fn progress_for(&self, user: &UserId) -> UserProgress {
            let mut progress = UserProgress::default_for(user.clone(), &self.catalog);
            for ((owner, _), (level_id, result)) in self.results.lock().unwrap().iter() {
                if owner != user {
                    continue;
                }
                progress
                    .levels
                    .entry(level_id.clone())
                    .or_insert_with(|| LevelProgress::empty(level_id.clone()))
                    .puzzles
                    .insert(result.puzzle_id.clone(), result.clone());
            }
            progress.recompute(&self.catalog);
            progress
        }
    }

    #[async_trait]
    impl ProgressBackend for FakeBackend {
        async fn fetch_progress(&self, user: &UserId) -> Result<UserProgress, BackendError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.fail_fetch.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(self.progress_for(user))
        }

        async fn submit_puzzle_result(
            &self,
            user: &UserId,
            level: &LevelId,
            puzzle: &PuzzleId,
            stars: u8,
            completed: bool,
        ) -> Result<UserProgress, BackendError> {
            if let Some(err) = self.fail_submit.lock().unwrap().clone() {
                return Err(err);
            }
            self.results.lock().unwrap().insert(
                (user.clone(), puzzle.clone()),
                (
                    level.clone(),
                    PuzzleResult {
                        puzzle_id: puzzle.clone(),
                        stars,
                        completed,
                    },
                ),
            );
            Ok(self.progress_for(user))
        }

        async fn fetch_completion(&self, user: &UserId) -> Result<CompletionStatus, BackendError> {
            Ok(self
                .completion
                .lock()
                .unwrap()
                .get(user)
                .cloned()
                .unwrap_or_else(CompletionStatus::not_completed))
        }
    }

    #[async_trait]
    impl RewardBackend for FakeBackend {
        async fn claim_virtual(&self, _user: &UserId, _reward: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn check_availability(
            &self,
            _user: &UserId,
            _total_stars: u32,
        ) -> Result<RewardAvailability, BackendError> {
            Ok(RewardAvailability {
                virtual_rewards: self.badges.lock().unwrap().clone(),
                physical_rewards: Vec::new(),
            })
        }
    }

    #[async_trait]
    impl CompletionSink for FakeBackend {
        async fn submit(&self, _record: &CompletionRecord) -> Result<(), BackendError> {
            if let Some(err) = self.fail_submit.lock().unwrap().clone() {
                return Err(err);
            }
            self.sink_writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine(backend: Arc<FakeBackend>) -> Orchestrator {
        Orchestrator::new(
            backend.catalog.clone(),
            tiers(),
            backend.clone(),
            backend.clone(),
            backend,
            Arc::new(MemorySubmissionLedger::new()),
            RetryPolicy::fast(),
        )
    }

    #[tokio::test]
    async fn full_journey_from_start_to_claim() {
        let backend = Arc::new(FakeBackend::new(levels()));
        let orchestrator = engine(backend.clone());
        let user = UserId::new("u1");

        let snapshot = orchestrator.start(user.clone()).await.unwrap();
        assert_eq!(snapshot.user, Some(user.clone()));
        assert_eq!(snapshot.progress.as_ref().unwrap().total_stars, 0);
        assert!(snapshot.best_tier.is_none());
        assert_eq!(snapshot.completion, CompletionState::NotCompleted);

        // First level: unlocks the Starter tier and advances the level.
        let update = orchestrator
            .record_puzzle_result(&LevelId::new("intro"), &PuzzleId::new("p1"), 5, true)
            .await
            .unwrap();
        assert_eq!(update.newly_completed, vec![LevelId::new("intro")]);
        assert!(!update.all_levels_complete_edge);
        assert_eq!(update.progress.current_level, LevelId::new("advanced"));

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.best_tier.as_ref().unwrap().title, "Starter");
        assert_eq!(snapshot.unread_notifications, 1);
        assert_eq!(
            snapshot.notifications[0].reward_ref.as_deref(),
            Some("tier:5")
        );

        // Second level: terminal edge, Gold tier, completion entered.
        let update = orchestrator
            .record_puzzle_result(&LevelId::new("advanced"), &PuzzleId::new("p2"), 5, true)
            .await
            .unwrap();
        assert!(update.all_levels_complete_edge);

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.best_tier.as_ref().unwrap().title, "Gold");
        assert_eq!(snapshot.tier_progress.as_ref().unwrap().percent, 100.0);
        assert_eq!(snapshot.unread_notifications, 2);
        let record = match &snapshot.completion {
            CompletionState::Completed(record) => record.clone(),
            other => panic!("expected Completed, got {:?}", other),
        };
        assert_eq!(record.reward_title, "Gold");
        assert!(record.code.starts_with("USB"));

        // Claim twice; exactly one sink write, identical record.
        let first = orchestrator.claim_completion().await.unwrap();
        let second = orchestrator.claim_completion().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.code, record.code);
        assert_eq!(backend.sink_writes.load(Ordering::SeqCst), 1);
        assert!(matches!(
            orchestrator.snapshot().completion,
            CompletionState::Submitted(_)
        ));
    }

    #[tokio::test]
    async fn repeated_evaluation_emits_notifications_once() {
        let backend = Arc::new(FakeBackend::new(levels()));
        backend.badges.lock().unwrap().push(RewardDescriptor {
            id: "badge:early-bird".to_string(),
            kind: RewardKind::Virtual,
            title: "Early Bird".to_string(),
        });
        let orchestrator = engine(backend.clone());
        let user = UserId::new("u1");

        orchestrator.start(user.clone()).await.unwrap();
        assert_eq!(orchestrator.snapshot().unread_notifications, 1);

        // A zero-star result re-runs the whole pipeline with identical
        // reward inputs; the badge must not be re-surfaced.
        orchestrator
            .record_puzzle_result(&LevelId::new("intro"), &PuzzleId::new("p1"), 0, true)
            .await
            .unwrap();
        assert_eq!(orchestrator.snapshot().unread_notifications, 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_snapshot_unchanged() {
        let backend = Arc::new(FakeBackend::new(levels()));
        let orchestrator = engine(backend.clone());
        orchestrator.start(UserId::new("u1")).await.unwrap();

        *backend.fail_submit.lock().unwrap() = Some(BackendError::Transient("503".into()));
        let result = orchestrator
            .record_puzzle_result(&LevelId::new("intro"), &PuzzleId::new("p1"), 5, true)
            .await;
        assert!(matches!(
            result,
            Err(EngineError::Client(ClientError::Unavailable { .. }))
        ));

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.progress.as_ref().unwrap().total_stars, 0);
        assert!(snapshot.best_tier.is_none());
        assert_eq!(snapshot.unread_notifications, 0);
    }

    #[tokio::test]
    async fn degraded_load_still_starts_the_session() {
        let backend = Arc::new(FakeBackend::new(levels()));
        *backend.fail_fetch.lock().unwrap() = Some(BackendError::Transient("503".into()));
        let orchestrator = engine(backend);

        let snapshot = orchestrator.start(UserId::new("u1")).await.unwrap();
        let progress = snapshot.progress.unwrap();
        assert_eq!(progress.current_level, LevelId::new("intro"));
        assert_eq!(progress.total_stars, 0);
    }

    #[tokio::test]
    async fn reentrant_start_is_a_no_op() {
        let backend = Arc::new(FakeBackend::new(levels()));
        let orchestrator = engine(backend.clone());
        let user = UserId::new("u1");

        orchestrator.start(user.clone()).await.unwrap();
        let loads = backend.fetch_calls.load(Ordering::SeqCst);
        orchestrator.start(user.clone()).await.unwrap();
        orchestrator.start(user).await.unwrap();
        assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), loads);
    }

    #[tokio::test]
    async fn switching_users_resets_all_session_state() {
        let backend = Arc::new(FakeBackend::new(levels()));
        let orchestrator = engine(backend.clone());

        orchestrator.start(UserId::new("a")).await.unwrap();
        orchestrator
            .record_puzzle_result(&LevelId::new("intro"), &PuzzleId::new("p1"), 5, true)
            .await
            .unwrap();
        assert_eq!(orchestrator.snapshot().unread_notifications, 1);

        let snapshot = orchestrator.switch_user(UserId::new("b")).await.unwrap();
        assert_eq!(snapshot.user, Some(UserId::new("b")));
        assert_eq!(snapshot.unread_notifications, 0);
        assert_eq!(snapshot.progress.as_ref().unwrap().total_stars, 0);
        assert_eq!(snapshot.completion, CompletionState::NotCompleted);

        // B earns the same tier: the emitted set was cleared, so it
        // surfaces again for the new session.
        orchestrator
            .record_puzzle_result(&LevelId::new("intro"), &PuzzleId::new("p1"), 5, true)
            .await
            .unwrap();
        assert_eq!(orchestrator.snapshot().unread_notifications, 1);
    }

    #[tokio::test]
    async fn concurrent_starts_settle_on_one_consistent_session() {
        let backend = Arc::new(FakeBackend::new(levels()));
        let orchestrator = Arc::new(engine(backend));

        for _ in 0..50 {
            let start_a = {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.start(UserId::new("a")).await })
            };
            let start_b = {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.start(UserId::new("b")).await })
            };
            start_a.await.unwrap().unwrap();
            start_b.await.unwrap().unwrap();

            // Whichever start won, the marker, the published snapshot, and
            // the progress it carries must all agree on one user.
            let winner = orchestrator.active_user().unwrap();
            let snapshot = orchestrator.snapshot();
            assert_eq!(snapshot.user, Some(winner.clone()));
            assert_eq!(snapshot.progress.unwrap().user_id, winner);

            orchestrator.stop().await;
        }
    }

    #[tokio::test]
    async fn stop_clears_the_observable_state() {
        let backend = Arc::new(FakeBackend::new(levels()));
        let orchestrator = engine(backend);
        orchestrator.start(UserId::new("u1")).await.unwrap();

        orchestrator.stop().await;
        assert_eq!(orchestrator.snapshot(), EngineSnapshot::default());
        assert!(orchestrator.active_user().is_none());
        assert!(matches!(
            orchestrator.claim_completion().await,
            Err(EngineError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn reconciliation_adopts_the_backend_code() {
        let backend = Arc::new(FakeBackend::new(levels()));
        let user = UserId::new("u1");
        backend.completion.lock().unwrap().insert(
            user.clone(),
            CompletionStatus {
                completed: true,
                code: Some("USB12345".to_string()),
                reward_title: Some("Gold".to_string()),
            },
        );
        let orchestrator = engine(backend);

        let snapshot = orchestrator.start(user).await.unwrap();
        match snapshot.completion {
            CompletionState::Completed(record) => {
                assert_eq!(record.code, "USB12345");
                assert_eq!(record.reward_title, "Gold");
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn claim_before_completion_is_rejected() {
        let backend = Arc::new(FakeBackend::new(levels()));
        let orchestrator = engine(backend);
        orchestrator.start(UserId::new("u1")).await.unwrap();

        assert!(matches!(
            orchestrator.claim_completion().await,
            Err(EngineError::NotCompleted)
        ));
    }

    #[tokio::test]
    async fn claiming_a_reward_marks_its_notification() {
        let backend = Arc::new(FakeBackend::new(levels()));
        backend.badges.lock().unwrap().push(RewardDescriptor {
            id: "badge:early-bird".to_string(),
            kind: RewardKind::Virtual,
            title: "Early Bird".to_string(),
        });
        let orchestrator = engine(backend);
        orchestrator.start(UserId::new("u1")).await.unwrap();

        orchestrator.claim_reward("badge:early-bird").await.unwrap();

        let snapshot = orchestrator.snapshot();
        let notification = snapshot
            .notifications
            .iter()
            .find(|n| n.reward_ref.as_deref() == Some("badge:early-bird"))
            .unwrap();
        assert!(notification.claimed);
        assert!(notification.read);
        assert_eq!(snapshot.unread_notifications, 0);
    }

    #[tokio::test]
    async fn watch_subscribers_observe_progress_changes() {
        let backend = Arc::new(FakeBackend::new(levels()));
        let orchestrator = engine(backend);
        let mut rx = orchestrator.subscribe();

        orchestrator.start(UserId::new("u1")).await.unwrap();
        orchestrator
            .record_puzzle_result(&LevelId::new("intro"), &PuzzleId::new("p1"), 5, true)
            .await
            .unwrap();

        rx.changed().await.unwrap();
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.progress.unwrap().total_stars, 5);
    }
}

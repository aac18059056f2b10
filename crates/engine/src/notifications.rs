//! Session-scoped notification ledger.
//!
//! Tracks which reward unlocks have already been surfaced so the
//! orchestrator can re-run the evaluator freely: re-presenting an
//! already-emitted reward is a no-op. The dedup key is the *reward
//! identity*, not the tier — badge-style rewards from the reward backend
//! dedup independently of the star-tier ladder.

use std::collections::HashSet;

use serde::Serialize;

use questline_catalog::{RewardCatalog, RewardTier};

// ──────────────────────────────────────────────
// Notification
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Reward,
    Message,
}

/// A user-visible alert. `claimed` implies `read`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    /// Reward identity for reward notifications; the dedup key.
    pub reward_ref: Option<String>,
    pub title: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    pub read: bool,
    pub claimed: bool,
}

/// A reward the orchestrator detected as unlocked, in detection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardCandidate {
    /// Stable reward identity (e.g. `tier:30` or a backend reward id).
    pub identity: String,
    pub title: String,
}

/// Candidates for tiers newly unlocked by a best-tier transition:
/// every tier above the previous best and at or below the new best,
/// ascending. Identity format is `tier:{stars_required}`.
pub fn tier_unlock_candidates(
    catalog: &RewardCatalog,
    previous_best: Option<&RewardTier>,
    new_best: Option<&RewardTier>,
) -> Vec<RewardCandidate> {
    let Some(new_best) = new_best else {
        return Vec::new();
    };
    let floor = previous_best.map(|t| t.stars_required).unwrap_or(0);
    catalog
        .tiers()
        .iter()
        .filter(|t| t.stars_required <= new_best.stars_required)
        .filter(|t| previous_best.is_none() || t.stars_required > floor)
        .map(|t| RewardCandidate {
            identity: format!("tier:{}", t.stars_required),
            title: t.title.clone(),
        })
        .collect()
}

// ──────────────────────────────────────────────
// NotificationLedger
// ──────────────────────────────────────────────

/// Per-session ledger of emitted notifications. Not thread-safe by itself;
/// the orchestrator owns it behind a lock.
#[derive(Default)]
pub struct NotificationLedger {
    next_id: u64,
    notifications: Vec<Notification>,
    emitted: HashSet<String>,
}

impl NotificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a notification for each candidate whose identity has not been
    /// emitted this session. Idempotent: calling again with the same input
    /// emits nothing. Returns only the newly created notifications, in
    /// candidate (detection) order.
    pub fn diff_and_emit(&mut self, candidates: &[RewardCandidate]) -> Vec<Notification> {
        let mut created = Vec::new();
        for candidate in candidates {
            if !self.emitted.insert(candidate.identity.clone()) {
                continue;
            }
            let notification = Notification {
                id: self.allocate_id(),
                kind: NotificationKind::Reward,
                reward_ref: Some(candidate.identity.clone()),
                title: candidate.title.clone(),
                created_at: now_rfc3339(),
                read: false,
                claimed: false,
            };
            log::info!(
                "reward unlocked: {} ({})",
                candidate.title,
                candidate.identity
            );
            self.notifications.push(notification.clone());
            created.push(notification);
        }
        created
    }

    /// Emit a plain message notification (no dedup key).
    pub fn emit_message(&mut self, title: impl Into<String>) -> Notification {
        let notification = Notification {
            id: self.allocate_id(),
            kind: NotificationKind::Message,
            reward_ref: None,
            title: title.into(),
            created_at: now_rfc3339(),
            read: false,
            claimed: false,
        };
        self.notifications.push(notification.clone());
        notification
    }

    pub fn mark_read(&mut self, id: u64) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for n in &mut self.notifications {
            n.read = true;
        }
    }

    /// Claim a reward notification. Claiming implies reading.
    pub fn claim(&mut self, id: u64) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.claimed = true;
                n.read = true;
                true
            }
            None => false,
        }
    }

    /// Remove a notification. Its reward identity stays in the emitted set,
    /// so the same reward is never re-surfaced this session.
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.notifications.len();
        self.notifications.retain(|n| n.id != id);
        self.notifications.len() != before
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn find_by_reward(&self, identity: &str) -> Option<&Notification> {
        self.notifications
            .iter()
            .find(|n| n.reward_ref.as_deref() == Some(identity))
    }

    /// Clear everything, including the emitted set. Used on user switch.
    pub fn reset(&mut self) {
        self.notifications.clear();
        self.emitted.clear();
        self.next_id = 0;
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

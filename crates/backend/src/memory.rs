//! In-process implementation of the submission ledger.
//!
//! Suitable for single-process deployments and tests. The at-most-once
//! guarantee only spans restarts when a persistent `SubmissionLedger`
//! implementation is plugged in instead.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use questline_catalog::UserId;

use crate::error::BackendError;
use crate::traits::SubmissionLedger;

/// `SubmissionLedger` backed by an in-memory set of user ids.
#[derive(Default)]
pub struct MemorySubmissionLedger {
    submitted: Mutex<HashSet<UserId>>,
}

impl MemorySubmissionLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionLedger for MemorySubmissionLedger {
    async fn was_submitted(&self, user: &UserId) -> Result<bool, BackendError> {
        let submitted = self
            .submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Ok(submitted.contains(user))
    }

    async fn mark_submitted(&self, user: &UserId) -> Result<(), BackendError> {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marks_and_reads_back() {
        let ledger = MemorySubmissionLedger::new();
        let user = UserId::new("u1");

        assert!(!ledger.was_submitted(&user).await.unwrap());
        ledger.mark_submitted(&user).await.unwrap();
        assert!(ledger.was_submitted(&user).await.unwrap());
        // Marking again is a no-op.
        ledger.mark_submitted(&user).await.unwrap();
        assert!(ledger.was_submitted(&user).await.unwrap());

        assert!(!ledger.was_submitted(&UserId::new("u2")).await.unwrap());
    }
}

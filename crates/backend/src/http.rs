//! HTTP implementation of the backend traits.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` to avoid
//! blocking the async runtime. HTTP status codes are folded into the
//! [`BackendError`] taxonomy here, so the engine's retry layer never sees
//! protocol detail: 429 → `RateLimited`, 408/5xx/transport → `Transient`,
//! 409 → `Conflict`, any other non-2xx → `Fatal`.

use async_trait::async_trait;
use serde_json::json;

use questline_catalog::{LevelId, PuzzleId, UserId, UserProgress};

use crate::error::BackendError;
use crate::record::{CompletionRecord, CompletionStatus, RewardAvailability};
use crate::traits::{CompletionSink, ProgressBackend, RewardBackend};

/// Configuration for [`HttpBackend`].
///
/// `auth_token` falls back to the `QUESTLINE_BACKEND_AUTH_TOKEN` env var
/// when not set explicitly.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
}

impl HttpBackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let auth_token = std::env::var("QUESTLINE_BACKEND_AUTH_TOKEN").ok();
        HttpBackendConfig {
            base_url: base_url.into(),
            auth_token,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Backend collaborator speaking plain JSON-over-HTTP.
///
/// Endpoint layout:
/// - `GET  {base}/progress/{user}` → `UserProgress`
/// - `POST {base}/progress/{user}/results` → canonical `UserProgress`
/// - `GET  {base}/completion/{user}` → `CompletionStatus`
/// - `POST {base}/rewards/{user}/claims/{reward}` → empty
/// - `GET  {base}/rewards/{user}/availability?stars={n}` → `RewardAvailability`
/// - `POST {base}/completions` → empty (external sink)
pub struct HttpBackend {
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Self {
        HttpBackend { config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Map a `ureq` failure into the engine-facing taxonomy.
    fn classify(err: ureq::Error) -> BackendError {
        match err {
            ureq::Error::StatusCode(429) => {
                BackendError::RateLimited("HTTP 429".to_string())
            }
            ureq::Error::StatusCode(409) => BackendError::Conflict("HTTP 409".to_string()),
            ureq::Error::StatusCode(408) => {
                BackendError::Transient("HTTP 408".to_string())
            }
            ureq::Error::StatusCode(code) if (500..=599).contains(&code) => {
                BackendError::Transient(format!("HTTP {}", code))
            }
            ureq::Error::StatusCode(code) => BackendError::Fatal(format!("HTTP {}", code)),
            // Transport-level failures (DNS, connect, timeout, TLS) are
            // retryable by definition.
            other => BackendError::Transient(other.to_string()),
        }
    }

    /// Blocking GET returning deserialized JSON. Runs on the blocking pool.
    async fn get_json<T>(&self, path: &str) -> Result<T, BackendError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let url = self.url(path);
        let auth_token = self.config.auth_token.clone();

        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let mut request = agent.get(&url);
            if let Some(ref token) = auth_token {
                request = request.header("Authorization", &format!("Bearer {}", token));
            }
            let response = request.call().map_err(Self::classify)?;
            response
                .into_body()
                .read_json()
                .map_err(|e| BackendError::Fatal(format!("malformed response body: {}", e)))
        })
        .await
        .map_err(|e| BackendError::Fatal(format!("task join error: {}", e)))?
    }

    /// Blocking POST with a JSON body. Runs on the blocking pool.
    async fn post_json<T>(&self, path: &str, body: serde_json::Value) -> Result<T, BackendError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let url = self.url(path);
        let auth_token = self.config.auth_token.clone();

        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let mut request = agent.post(&url);
            if let Some(ref token) = auth_token {
                request = request.header("Authorization", &format!("Bearer {}", token));
            }
            let response = request.send_json(&body).map_err(Self::classify)?;
            response
                .into_body()
                .read_json()
                .map_err(|e| BackendError::Fatal(format!("malformed response body: {}", e)))
        })
        .await
        .map_err(|e| BackendError::Fatal(format!("task join error: {}", e)))?
    }

    /// Blocking POST where only transport-level success matters; the
    /// response body, if any, is drained and discarded.
    async fn post_ack(&self, path: &str, body: serde_json::Value) -> Result<(), BackendError> {
        let url = self.url(path);
        let auth_token = self.config.auth_token.clone();

        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let mut request = agent.post(&url);
            if let Some(ref token) = auth_token {
                request = request.header("Authorization", &format!("Bearer {}", token));
            }
            let response = request.send_json(&body).map_err(Self::classify)?;
            let _ = response.into_body().read_to_string();
            Ok(())
        })
        .await
        .map_err(|e| BackendError::Fatal(format!("task join error: {}", e)))?
    }
}

#[async_trait]
impl ProgressBackend for HttpBackend {
    async fn fetch_progress(&self, user: &UserId) -> Result<UserProgress, BackendError> {
        self.get_json(&format!("progress/{}", user)).await
    }

    async fn submit_puzzle_result(
        &self,
        user: &UserId,
        level: &LevelId,
        puzzle: &PuzzleId,
        stars: u8,
        completed: bool,
    ) -> Result<UserProgress, BackendError> {
        if stars > questline_catalog::MAX_STARS_PER_PUZZLE {
            return Err(BackendError::Conflict(format!(
                "stars {} exceeds the per-puzzle maximum",
                stars
            )));
        }
        self.post_json(
            &format!("progress/{}/results", user),
            json!({
                "level_id": level,
                "puzzle_id": puzzle,
                "stars": stars,
                "completed": completed,
            }),
        )
        .await
    }

    async fn fetch_completion(&self, user: &UserId) -> Result<CompletionStatus, BackendError> {
        self.get_json(&format!("completion/{}", user)).await
    }
}

#[async_trait]
impl RewardBackend for HttpBackend {
    async fn claim_virtual(&self, user: &UserId, reward_id: &str) -> Result<(), BackendError> {
        self.post_ack(
            &format!("rewards/{}/claims/{}", user, reward_id),
            json!({}),
        )
        .await
    }

    async fn check_availability(
        &self,
        user: &UserId,
        total_stars: u32,
    ) -> Result<RewardAvailability, BackendError> {
        self.get_json(&format!(
            "rewards/{}/availability?stars={}",
            user, total_stars
        ))
        .await
    }
}

#[async_trait]
impl CompletionSink for HttpBackend {
    async fn submit(&self, record: &CompletionRecord) -> Result<(), BackendError> {
        self.post_ack(
            "completions",
            serde_json::to_value(record)
                .map_err(|e| BackendError::Fatal(format!("serialize record: {}", e)))?,
        )
        .await
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

//! Single-flight request coalescing.
//!
//! At most one physical request runs per `(operation, scope)` key; callers
//! arriving while a flight is up join it and receive the leader's outcome,
//! success or failure alike. The key is released before the outcome is
//! broadcast, so a caller arriving after completion starts a fresh flight.
//!
//! A per-scope async mutex additionally serializes leaders of *different*
//! operations under the same scope: a progress write for a user is never
//! interleaved with a progress load for the same user, while flights for
//! unrelated scopes proceed in parallel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::error::ClientError;

// ──────────────────────────────────────────────
// FlightKey
// ──────────────────────────────────────────────

/// Identity of a logical request: operation name plus the scope it is
/// keyed under (typically the user id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlightKey {
    pub operation: String,
    pub scope: String,
}

impl FlightKey {
    pub fn new(operation: impl Into<String>, scope: impl Into<String>) -> Self {
        FlightKey {
            operation: operation.into(),
            scope: scope.into(),
        }
    }
}

impl std::fmt::Display for FlightKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.operation, self.scope)
    }
}

// ──────────────────────────────────────────────
// SingleFlight
// ──────────────────────────────────────────────

type FlightMap<T> = Mutex<HashMap<FlightKey, broadcast::Sender<Result<T, ClientError>>>>;

/// Coalesces concurrent identical requests into one execution.
pub struct SingleFlight<T> {
    flights: FlightMap<T>,
    scopes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        SingleFlight {
            flights: Mutex::new(HashMap::new()),
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op` under the key, or join an identical in-flight call.
    ///
    /// The leader executes `op` while holding the scope lock; joiners wait
    /// on the leader's channel without touching the lock. If the leader is
    /// dropped before producing an outcome, joiners get
    /// `ClientError::Failed` rather than hanging.
    pub async fn run<F, Fut>(&self, key: FlightKey, op: F) -> Result<T, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        // The map guard must not span an await, or the future stops being
        // `Send`: resolve leader/joiner to an owned Role first.
        let role = {
            let mut flights = self.flights.lock().unwrap_or_else(|e| e.into_inner());
            match flights.get(&key) {
                Some(tx) => Role::Join(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    flights.insert(key.clone(), tx.clone());
                    Role::Lead(tx)
                }
            }
        };

        let tx = match role {
            Role::Join(mut rx) => {
                log::debug!("joining in-flight request {}", key);
                return match rx.recv().await {
                    Ok(outcome) => outcome,
                    Err(_closed) => Err(ClientError::Failed {
                        operation: key.operation.clone(),
                        message: "in-flight request was abandoned".to_string(),
                    }),
                };
            }
            Role::Lead(tx) => tx,
        };

        // Ensure the key is released even if this future is dropped
        // mid-flight; joiners then observe a closed channel.
        let guard = FlightGuard {
            flights: &self.flights,
            key: key.clone(),
        };

        let scope_lock = self.scope_lock(&key.scope);
        let scope_guard = scope_lock.lock().await;

        let outcome = op().await;

        drop(scope_guard);
        drop(scope_lock);
        self.release_scope(&key.scope);

        drop(guard);
        // Joiners subscribed before the key was released; nobody listening
        // is fine too.
        let _ = tx.send(outcome.clone());
        outcome
    }

    fn scope_lock(&self, scope: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        scopes
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the scope's lock entry once no flight holds a handle to it,
    /// so the map does not grow with every scope ever seen.
    fn release_scope(&self, scope: &str) {
        let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = scopes.get(scope) {
            if Arc::strong_count(lock) == 1 {
                scopes.remove(scope);
            }
        }
    }
}

/// Owned outcome of the leader-election under the map lock.
enum Role<T> {
    Lead(broadcast::Sender<Result<T, ClientError>>),
    Join(broadcast::Receiver<Result<T, ClientError>>),
}

impl<T: Clone + Send + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct FlightGuard<'a, T> {
    flights: &'a FlightMap<T>,
    key: FlightKey,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        self.flights
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

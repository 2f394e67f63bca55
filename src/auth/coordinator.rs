// Single-flight credential refresh
//
// Any number of callers can discover a stale credential at the same moment.
// The coordinator collapses them into one network round-trip per episode
// and fans the outcome back out to every waiter exactly once.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::oneshot;

use super::store::CredentialStore;

/// Response keys probed for the new credential, in priority order.
/// The backend is not consistent about the field name, so every known
/// spelling is checked and the first non-empty value wins.
const CREDENTIAL_KEYS: &[&str] = &["accessToken", "access_token", "token", "jwt"];

/// Phase of the refresh state machine. Waiters only exist while a network
/// call is in flight; an idle coordinator holds no queue.
enum RefreshPhase {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<Option<String>>>,
    },
}

/// Owns the one-at-a-time refresh episode and its waiter queue
pub struct RefreshCoordinator {
    phase: Mutex<RefreshPhase>,

    /// Bare transport for the refresh call itself. It must not run through
    /// the 401-handling pipeline, otherwise a rejected refresh would try
    /// to refresh again. Carries the out-of-band cookie credential.
    http: Client,

    refresh_url: String,

    credentials: CredentialStore,
}

impl RefreshCoordinator {
    pub fn new(
        refresh_url: String,
        credentials: CredentialStore,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .context("Failed to create refresh transport")?;

        Ok(Self {
            phase: Mutex::new(RefreshPhase::Idle),
            http,
            refresh_url,
            credentials,
        })
    }

    /// Obtain a fresh credential, or None when the refresh failed and the
    /// session is gone.
    ///
    /// Concurrent callers share a single network call: the first caller
    /// flips the coordinator to `Refreshing` and performs the round-trip,
    /// everyone arriving while it is in flight is queued and woken with
    /// the same outcome, in arrival order.
    pub async fn request_refresh(&self) -> Option<String> {
        // Check-and-set under a single lock acquisition: two callers can
        // never both observe Idle.
        let waiter = {
            let mut phase = self.lock_phase();
            match &mut *phase {
                RefreshPhase::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                RefreshPhase::Idle => {
                    *phase = RefreshPhase::Refreshing {
                        waiters: Vec::new(),
                    };
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            // A dropped sender means the episode was abandoned before it
            // settled; the waiter observes a failed refresh.
            return rx.await.unwrap_or(None);
        }

        // The guard settles the episode even when this future is dropped
        // mid-refresh (caller timeout, select!): queued waiters are failed
        // and the phase returns to Idle instead of wedging in Refreshing.
        let episode = EpisodeGuard {
            coordinator: self,
            settled: false,
        };

        let outcome = match self.execute_refresh().await {
            Ok(credential) => {
                if let Err(e) = self.credentials.set(&credential) {
                    tracing::warn!("Failed to persist refreshed credential: {e:#}");
                }
                Some(credential)
            }
            Err(e) => {
                tracing::warn!("Credential refresh failed: {e:#}");
                if let Err(e) = self.credentials.clear() {
                    tracing::warn!("Failed to clear credential after refresh failure: {e:#}");
                }
                None
            }
        };

        episode.settle(outcome)
    }

    /// Settle the current episode: take the queue, return to Idle, then
    /// notify waiters in the order they arrived.
    fn finish_episode(&self, outcome: &Option<String>) {
        let waiters = {
            let mut phase = self.lock_phase();
            match std::mem::replace(&mut *phase, RefreshPhase::Idle) {
                RefreshPhase::Refreshing { waiters } => waiters,
                RefreshPhase::Idle => Vec::new(),
            }
        };
        for tx in waiters {
            // A waiter that stopped listening is not our problem
            let _ = tx.send(outcome.clone());
        }
    }

    fn lock_phase(&self) -> std::sync::MutexGuard<'_, RefreshPhase> {
        // Poisoning cannot leave the phase structurally invalid; recover
        // the guard instead of panicking
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One refresh round-trip. The endpoint takes no body; the transport
    /// supplies the out-of-band credential by itself.
    async fn execute_refresh(&self) -> Result<String> {
        tracing::info!("Refreshing access credential...");

        let response = self
            .http
            .post(&self.refresh_url)
            .send()
            .await
            .context("Failed to send refresh request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Refresh endpoint returned {}: {}", status, body);
        }

        let payload: Value = response
            .json()
            .await
            .context("Failed to parse refresh response")?;

        let credential = extract_credential(&payload)
            .context("Refresh response does not contain a credential")?;

        tracing::info!("Access credential refreshed");
        Ok(credential)
    }
}

/// Settles the episode exactly once. Dropping the guard without calling
/// `settle` (the leader future was cancelled mid-refresh) fails every
/// queued waiter and returns the coordinator to `Idle`.
struct EpisodeGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl EpisodeGuard<'_> {
    fn settle(mut self, outcome: Option<String>) -> Option<String> {
        self.settled = true;
        self.coordinator.finish_episode(&outcome);
        outcome
    }
}

impl Drop for EpisodeGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Refresh episode abandoned before settling, failing queued waiters");
            self.coordinator.finish_episode(&None);
        }
    }
}

/// Probe the known credential keys in priority order
fn extract_credential(payload: &Value) -> Option<String> {
    CREDENTIAL_KEYS.iter().find_map(|key| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

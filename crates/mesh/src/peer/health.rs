//! Connection health monitoring and ICE-restart recovery
//!
//! A connection that enters `failed` is recovered by renegotiating with the
//! ICE-restart flag. Attempts are bounded and spaced with exponential
//! backoff; a transition to `connected` resets the budget.

use super::negotiation::NegotiationCoordinator;
use super::state::ConnectionState;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// ICE-restart retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceRestartPolicy {
    /// Maximum restart attempts per failure episode (default: 5)
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds (default: 1000ms)
    pub backoff_initial_ms: u64,
    /// Maximum delay between attempts in milliseconds (default: 30000ms)
    pub backoff_max_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to each delay (default: true)
    pub jitter_enabled: bool,
}

impl Default for IceRestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_initial_ms: 1000,
            backoff_max_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl IceRestartPolicy {
    /// Single immediate attempt, no retries
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Calculate the delay preceding retry number `retry` (0-indexed)
    ///
    /// Uses exponential backoff with optional jitter.
    pub fn calculate_backoff(&self, retry: u32) -> Duration {
        let backoff_ms = (self.backoff_initial_ms as f64)
            * self.backoff_multiplier.powi(retry.min(i32::MAX as u32) as i32);

        let backoff_ms = backoff_ms.min(self.backoff_max_ms as f64);

        // Add jitter (0-25% of backoff)
        let final_ms = if self.jitter_enabled {
            backoff_ms + rand_jitter(backoff_ms * 0.25)
        } else {
            backoff_ms
        };

        Duration::from_millis(final_ms as u64)
    }

    /// Check if another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Validate policy parameters
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "ice_restart.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(Error::InvalidConfig(
                "ice_restart.backoff_max_ms must be >= backoff_initial_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Uniform jitter in `[0, max)`
fn rand_jitter(max: f64) -> f64 {
    rand::random::<f64>() * max
}

/// What the monitor did in response to a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// Transition needs no action
    None,
    /// Connected: attempt budget reset
    Reset,
    /// ICE-restart offer emitted (1-indexed attempt number)
    RestartSent(u32),
    /// A restart for this connection is already running
    InProgress,
    /// Connection left `failed` or the peer closed during backoff
    Abandoned,
    /// Attempt budget exhausted; peer left for the application
    Exhausted,
}

/// Watches one peer's aggregate connectivity state
#[derive(Debug)]
pub struct ConnectionHealthMonitor {
    peer_id: String,
    policy: IceRestartPolicy,
    attempts: AtomicU32,
    restarting: AtomicBool,
}

struct RestartGuard<'a>(&'a AtomicBool);

impl Drop for RestartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ConnectionHealthMonitor {
    /// Monitor for `peer_id` using `policy`
    pub fn new(peer_id: impl Into<String>, policy: IceRestartPolicy) -> Self {
        Self {
            peer_id: peer_id.into(),
            policy,
            attempts: AtomicU32::new(0),
            restarting: AtomicBool::new(false),
        }
    }

    /// Restart attempts made since the last `connected`
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// React to a connection-state transition
    ///
    /// `is_open` reports whether the peer is still registered. It and the
    /// live connection state are consulted before every restart attempt,
    /// so a `failed` event overtaken by a later transition does nothing.
    pub async fn on_connection_state<F>(
        &self,
        state: ConnectionState,
        coordinator: &NegotiationCoordinator,
        is_open: F,
    ) -> HealthAction
    where
        F: Fn() -> bool,
    {
        match state {
            ConnectionState::Connected => {
                let previous = self.attempts.swap(0, Ordering::SeqCst);
                if previous > 0 {
                    info!(peer_id = %self.peer_id, attempts = previous, "Connection recovered");
                }
                HealthAction::Reset
            }
            ConnectionState::Failed => self.recover(coordinator, is_open).await,
            other => {
                debug!(peer_id = %self.peer_id, state = ?other, "Connection state changed");
                HealthAction::None
            }
        }
    }

    async fn recover<F>(&self, coordinator: &NegotiationCoordinator, is_open: F) -> HealthAction
    where
        F: Fn() -> bool,
    {
        if self.restarting.swap(true, Ordering::SeqCst) {
            return HealthAction::InProgress;
        }
        let _guard = RestartGuard(&self.restarting);

        loop {
            let attempt = self.attempts.load(Ordering::SeqCst);
            if !self.policy.should_retry(attempt) {
                warn!(
                    peer_id = %self.peer_id,
                    attempts = attempt,
                    "ICE restart attempts exhausted, leaving peer disconnected"
                );
                return HealthAction::Exhausted;
            }

            if attempt > 0 {
                let delay = self.policy.calculate_backoff(attempt - 1);
                debug!(peer_id = %self.peer_id, attempt, ?delay, "Backing off before ICE restart");
                tokio::time::sleep(delay).await;
            }

            // the triggering event may be stale by now
            let current = coordinator.connection_state();
            if !is_open() || current != ConnectionState::Failed {
                debug!(peer_id = %self.peer_id, state = ?current, "ICE restart no longer needed");
                return HealthAction::Abandoned;
            }

            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            info!(peer_id = %self.peer_id, attempt, "Connection failed, restarting ICE");

            match coordinator.restart_ice().await {
                Ok(()) => return HealthAction::RestartSent(attempt),
                Err(e) => warn!(peer_id = %self.peer_id, attempt, "ICE restart failed: {}", e),
            }
        }
    }
}

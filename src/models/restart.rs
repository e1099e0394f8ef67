use super::actual_lrp::{ActualLrp, StateKind};
use crate::core::clock::{as_millis_u64, elapsed_between};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Crash-restart thresholds.
///
/// A crashed instance is restarted immediately for its first
/// `max_immediate_restarts` crashes, then only after an exponential backoff
/// (`base_backoff_ms * 2^n`, capped at `max_backoff_ms`), and never once it
/// has crashed `max_restart_attempts` times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// A running instance that crashes after this long starts a fresh crash history.
    pub crash_reset_timeout_ms: u64,
    pub max_immediate_restarts: u32,
    pub max_restart_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            crash_reset_timeout_ms: 5 * 60_000,
            max_immediate_restarts: 3,
            max_restart_attempts: 200,
            base_backoff_ms: 30_000,
            max_backoff_ms: 16 * 60_000,
        }
    }
}

impl RestartPolicy {
    pub fn crash_reset_timeout(mut self, timeout: Duration) -> Self {
        self.crash_reset_timeout_ms = as_millis_u64(timeout);
        self
    }

    pub fn max_immediate_restarts(mut self, count: u32) -> Self {
        self.max_immediate_restarts = count;
        self
    }

    pub fn max_restart_attempts(mut self, count: u32) -> Self {
        self.max_restart_attempts = count;
        self
    }

    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff_ms = as_millis_u64(backoff);
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff_ms = as_millis_u64(backoff);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_restart_attempts < self.max_immediate_restarts {
            return Err(
                "max_restart_attempts cannot be lower than max_immediate_restarts".to_string(),
            );
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err("base_backoff_ms cannot exceed max_backoff_ms".to_string());
        }
        Ok(())
    }

    /// Crash count to persist for a crash reported at `now`.
    pub fn next_crash_count(
        &self,
        now: DateTime<Utc>,
        since: DateTime<Utc>,
        previous: u32,
        was_running: bool,
    ) -> u32 {
        let stable_for = elapsed_between(since, now);
        if was_running && stable_for > Duration::from_millis(self.crash_reset_timeout_ms) {
            1
        } else {
            previous.saturating_add(1)
        }
    }

    pub fn should_restart_immediately(&self, crash_count: u32) -> bool {
        crash_count < self.max_immediate_restarts
    }

    /// Wait required after the last crash before a restart is allowed.
    pub fn backoff(&self, crash_count: u32) -> Duration {
        let exponent = crash_count.saturating_sub(self.max_immediate_restarts);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let millis = self
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn should_restart(&self, now: DateTime<Utc>, since: DateTime<Utc>, crash_count: u32) -> bool {
        if self.should_restart_immediately(crash_count) {
            return true;
        }
        if crash_count >= self.max_restart_attempts {
            return false;
        }
        elapsed_between(since, now) >= self.backoff(crash_count)
    }
}

impl ActualLrp {
    /// Whether convergence should ask for this crashed instance to be started again.
    pub fn should_restart_crash(&self, now: DateTime<Utc>, policy: &RestartPolicy) -> bool {
        self.kind() == StateKind::Crashed && policy.should_restart(now, self.since, self.crash_count)
    }
}

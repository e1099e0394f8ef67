use crate::core::clock::as_millis_u64;
use crate::core::{DbError, Format, Result};
use crate::models::RestartPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Store-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a transaction waits on a row lock before giving up with a
    /// retriable deadlock error.
    pub lock_timeout_ms: u64,

    /// Encoding used for newly written blob columns.
    pub format: Format,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            format: Format::default(),
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = as_millis_u64(timeout);
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn lock_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.lock_timeout_ms == 0 {
            return Err("lock_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LrpConvergenceConfig {
    /// Unclaimed instances older than this are asked to be started again.
    pub stale_unclaimed_duration_ms: u64,
}

impl Default for LrpConvergenceConfig {
    fn default() -> Self {
        Self {
            stale_unclaimed_duration_ms: 30_000,
        }
    }
}

impl LrpConvergenceConfig {
    pub fn stale_unclaimed_duration(mut self, duration: Duration) -> Self {
        self.stale_unclaimed_duration_ms = as_millis_u64(duration);
        self
    }

    pub fn stale_unclaimed(&self) -> Duration {
        Duration::from_millis(self.stale_unclaimed_duration_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.stale_unclaimed_duration_ms == 0 {
            return Err("stale_unclaimed_duration_ms must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConvergenceConfig {
    pub kick_duration_ms: u64,
    pub expire_pending_duration_ms: u64,
    pub expire_completed_duration_ms: u64,
}

impl Default for TaskConvergenceConfig {
    fn default() -> Self {
        Self {
            kick_duration_ms: 30_000,
            expire_pending_duration_ms: 30 * 60_000,
            expire_completed_duration_ms: 2 * 60_000,
        }
    }
}

impl TaskConvergenceConfig {
    pub fn kick_duration(mut self, duration: Duration) -> Self {
        self.kick_duration_ms = as_millis_u64(duration);
        self
    }

    pub fn expire_pending_duration(mut self, duration: Duration) -> Self {
        self.expire_pending_duration_ms = as_millis_u64(duration);
        self
    }

    pub fn expire_completed_duration(mut self, duration: Duration) -> Self {
        self.expire_completed_duration_ms = as_millis_u64(duration);
        self
    }

    pub fn kick(&self) -> Duration {
        Duration::from_millis(self.kick_duration_ms)
    }

    pub fn expire_pending(&self) -> Duration {
        Duration::from_millis(self.expire_pending_duration_ms)
    }

    pub fn expire_completed(&self) -> Duration {
        Duration::from_millis(self.expire_completed_duration_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.kick_duration_ms == 0 {
            return Err("kick_duration_ms must be positive".to_string());
        }
        if self.expire_pending_duration_ms <= self.kick_duration_ms {
            return Err("expire_pending_duration_ms must exceed kick_duration_ms".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergerConfig {
    pub interval_ms: u64,
    pub lrp: LrpConvergenceConfig,
    pub task: TaskConvergenceConfig,
}

impl Default for ConvergerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            lrp: LrpConvergenceConfig::default(),
            task: TaskConvergenceConfig::default(),
        }
    }
}

impl ConvergerConfig {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval_ms = as_millis_u64(interval);
        self
    }

    pub fn lrp(mut self, lrp: LrpConvergenceConfig) -> Self {
        self.lrp = lrp;
        self
    }

    pub fn task(mut self, task: TaskConvergenceConfig) -> Self {
        self.task = task;
        self
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.interval_ms == 0 {
            return Err("interval_ms must be positive".to_string());
        }
        self.lrp.validate()?;
        self.task.validate()
    }
}

/// Everything the store and the converger read at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub restart: RestartPolicy,
    pub converger: ConvergerConfig,
}

impl Config {
    /// Parses and validates a JSON document; absent sections keep their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| DbError::BadRequest(format!("invalid config: {}", e)))?;
        config.validate().map_err(DbError::BadRequest)?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.store.validate()?;
        self.restart.validate()?;
        self.converger.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_builders_saturate_oversized_durations() {
        let task = TaskConvergenceConfig::default().expire_pending_duration(Duration::MAX);
        assert_eq!(task.expire_pending_duration_ms, u64::MAX);
        assert_eq!(task.expire_pending(), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_from_json_keeps_missing_defaults() {
        let config = Config::from_json(
            r#"{"converger": {"task": {"kick_duration_ms": 1000}}, "store": {"format": "Json"}}"#,
        )
        .unwrap();
        assert_eq!(config.converger.task.kick(), Duration::from_secs(1));
        assert_eq!(
            config.converger.task.expire_pending(),
            Duration::from_secs(30 * 60)
        );
        assert_eq!(config.store.format, Format::Json);
        assert_eq!(config.restart, RestartPolicy::default());
    }

    #[test]
    fn test_from_json_rejects_invalid_values() {
        let err = Config::from_json(r#"{"store": {"lock_timeout_ms": 0}}"#).unwrap_err();
        assert!(matches!(err, DbError::BadRequest(_)));

        let err = Config::from_json("not json").unwrap_err();
        assert!(matches!(err, DbError::BadRequest(_)));
    }

    #[test]
    fn test_pending_expiry_must_exceed_kick() {
        let task = TaskConvergenceConfig::default()
            .kick_duration(Duration::from_secs(60))
            .expire_pending_duration(Duration::from_secs(60));
        assert!(task.validate().is_err());
    }
}

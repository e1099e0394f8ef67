//! Row locks backing `select_for_update`.
//!
//! A lock is taken on a key whether or not the row exists, so a transaction
//! that finds nothing can still create the row without racing a peer.

use super::rows::ActualLrpRowKey;
use crate::core::{DbError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    ActualLrp(ActualLrpRowKey),
    Task(String),
    DesiredLrp(String),
    Domain(String),
}

#[derive(Default)]
struct LockTable {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

pub struct RowLockManager {
    table: Arc<LockTable>,
    timeout: Duration,
}

impl RowLockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Arc::new(LockTable::default()),
            timeout,
        }
    }

    /// Waits for the row lock; waiting past the configured timeout is
    /// reported as a deadlock the caller may retry.
    pub async fn acquire(&self, key: LockKey) -> Result<RowLockGuard> {
        let mutex = {
            let mut locks = self.table.locks.lock()?;
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = tokio::time::timeout(self.timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                DbError::Deadlock(format!(
                    "timed out after {:?} waiting for row lock on {:?}",
                    self.timeout, key
                ))
            })?;

        Ok(RowLockGuard {
            key,
            guard: Some(guard),
            table: Arc::clone(&self.table),
        })
    }

    /// Keys with a holder or a waiter.
    pub fn tracked_keys(&self) -> usize {
        self.table
            .locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_default()
    }
}

pub struct RowLockGuard {
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl RowLockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for RowLockGuard {
    fn drop(&mut self) {
        let mut locks = self
            .table
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(self.guard.take());
        let idle = locks
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1);
        if idle {
            locks.remove(&self.key);
        }
    }
}

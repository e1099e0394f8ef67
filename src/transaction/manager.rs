// ============================================================================
// Transaction Manager
// ============================================================================

use super::{Transaction, TransactionId, TransactionState};
use crate::storage::{InMemoryStorage, RowLockManager};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) struct SharedState {
    pub(crate) storage: Arc<InMemoryStorage>,
    pub(crate) row_locks: RowLockManager,
    active: Mutex<HashSet<TransactionId>>,
    committed: AtomicU64,
    aborted: AtomicU64,
}

impl SharedState {
    pub(crate) fn finish(&self, id: TransactionId, outcome: TransactionState) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&id);
        match outcome {
            TransactionState::Committed => self.committed.fetch_add(1, Ordering::Relaxed),
            TransactionState::Aborted => self.aborted.fetch_add(1, Ordering::Relaxed),
            TransactionState::Active => 0,
        };
    }
}

#[derive(Clone)]
pub struct TransactionManager {
    shared: Arc<SharedState>,
}

impl TransactionManager {
    pub fn new(storage: Arc<InMemoryStorage>, lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(SharedState {
                storage,
                row_locks: RowLockManager::new(lock_timeout),
                active: Mutex::new(HashSet::new()),
                committed: AtomicU64::new(0),
                aborted: AtomicU64::new(0),
            }),
        }
    }

    pub fn begin(&self) -> Transaction {
        let transaction = Transaction::new(Arc::clone(&self.shared));
        let mut active = self
            .shared
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.insert(transaction.id());
        transaction
    }

    pub fn storage(&self) -> &Arc<InMemoryStorage> {
        &self.shared.storage
    }

    pub fn stats(&self) -> TransactionStats {
        let active = self
            .shared
            .active
            .lock()
            .map(|active| active.len())
            .unwrap_or_default();
        TransactionStats {
            active,
            committed: self.shared.committed.load(Ordering::Relaxed),
            aborted: self.shared.aborted.load(Ordering::Relaxed),
            tracked_locks: self.shared.row_locks.tracked_keys(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionStats {
    pub active: usize,
    pub committed: u64,
    pub aborted: u64,
    pub tracked_locks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DbError;
    use crate::storage::{DomainRow, TaskRow};
    use chrono::Utc;

    fn manager() -> TransactionManager {
        TransactionManager::new(Arc::new(InMemoryStorage::new()), Duration::from_millis(50))
    }

    fn domain(name: &str) -> DomainRow {
        DomainRow {
            name: name.to_string(),
            expire_time: None,
        }
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let manager = manager();
        let mut txn = manager.begin();
        txn.insert(domain("apps")).await.unwrap();
        assert_eq!(manager.storage().row_count::<DomainRow>().await, 0);

        txn.commit().await.unwrap();
        assert_eq!(manager.storage().row_count::<DomainRow>().await, 1);

        let stats = manager.stats();
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.tracked_locks, 0);
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let manager = manager();
        {
            let mut txn = manager.begin();
            txn.insert(domain("apps")).await.unwrap();
        }
        assert_eq!(manager.storage().row_count::<DomainRow>().await, 0);
        assert_eq!(manager.stats().aborted, 1);
    }

    #[tokio::test]
    async fn test_staged_changes_and_locks_are_counted() {
        let manager = manager();
        let mut txn = manager.begin();
        txn.lock_rows::<DomainRow, _>(["b".to_string(), "a".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(txn.lock_count(), 2);
        assert_eq!(txn.change_count(), 0);

        txn.insert(domain("a")).await.unwrap();
        txn.insert(domain("c")).await.unwrap();
        assert_eq!(txn.change_count(), 2);
        assert_eq!(txn.lock_count(), 3);
        assert_eq!(manager.stats().tracked_locks, 3);

        txn.commit().await.unwrap();
        assert_eq!(manager.stats().tracked_locks, 0);
    }

    #[tokio::test]
    async fn test_reads_see_own_writes() {
        let manager = manager();
        let mut txn = manager.begin();
        txn.insert(domain("apps")).await.unwrap();
        assert!(txn.get::<DomainRow>(&"apps".to_string()).await.unwrap().is_some());
        assert_eq!(txn.insert(domain("apps")).await, Err(DbError::ResourceExists));

        assert!(txn.delete::<DomainRow>(&"apps".to_string()).await.unwrap());
        assert!(txn.scan::<DomainRow, _>(|_| true).await.unwrap().is_empty());
        assert!(!txn.delete::<DomainRow>(&"apps".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_of_missing_row_fails() {
        let manager = manager();
        let mut txn = manager.begin();
        let now = Utc::now();
        let row = TaskRow {
            guid: "t".into(),
            domain: "d".into(),
            state: "PENDING".into(),
            cell_id: String::new(),
            result: String::new(),
            failed: false,
            failure_reason: String::new(),
            task_definition: Vec::new(),
            created_at: now,
            updated_at: now,
            first_completed_at: None,
        };
        assert_eq!(txn.update(row).await, Err(DbError::ResourceNotFound));
    }

    #[tokio::test]
    async fn test_locked_row_blocks_second_writer() {
        let manager = manager();
        let mut first = manager.begin();
        first
            .select_for_update::<DomainRow>(&"apps".to_string())
            .await
            .unwrap();

        let mut second = manager.begin();
        let err = second
            .select_for_update::<DomainRow>(&"apps".to_string())
            .await
            .unwrap_err();
        assert!(err.is_retriable());

        first.rollback();
        assert!(
            second
                .select_for_update::<DomainRow>(&"apps".to_string())
                .await
                .is_ok()
        );
    }
}

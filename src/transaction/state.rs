// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through defined states: Active -> Committed/Aborted
//
// Writes go through row locks: `select_for_update` locks a key (present or
// not) for the rest of the transaction, reads see the transaction's own
// staged changes, and nothing reaches the committed tables before commit.
// Dropping an active transaction rolls it back.
//
// ============================================================================

use super::Change;
use super::change::RowChange;
use super::manager::SharedState;
use crate::core::{DbError, Result};
use crate::storage::{LockKey, Row, RowLockGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    changes: Vec<Change>,
    locks: HashMap<LockKey, RowLockGuard>,
    shared: Arc<SharedState>,
    start_time: std::time::Instant,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            changes: Vec::new(),
            locks: HashMap::new(),
            shared,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::Unknown(format!(
                "transaction {} is {}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    async fn lock(&mut self, key: LockKey) -> Result<()> {
        if self.locks.contains_key(&key) {
            return Ok(());
        }
        let guard = self.shared.row_locks.acquire(key.clone()).await?;
        self.locks.insert(key, guard);
        Ok(())
    }

    /// The latest staged version of a row: `Some(None)` when staged as
    /// deleted, `None` when this transaction never touched it.
    fn staged<R: Row>(&self, key: &R::Key) -> Option<Option<R>> {
        self.changes
            .iter()
            .rev()
            .filter_map(R::unwrap)
            .find(|change| &change.key() == key)
            .map(|change| change.row().cloned())
    }

    /// Reads a row without locking it.
    pub async fn get<R: Row>(&self, key: &R::Key) -> Result<Option<R>> {
        self.ensure_active()?;
        match self.staged::<R>(key) {
            Some(row) => Ok(row),
            None => Ok(self.shared.storage.get::<R>(key).await),
        }
    }

    /// Locks the key until the transaction ends and returns the row as this
    /// transaction sees it.
    pub async fn select_for_update<R: Row>(&mut self, key: &R::Key) -> Result<Option<R>> {
        self.ensure_active()?;
        self.lock(R::lock_key(key)).await?;
        self.get::<R>(key).await
    }

    /// Locks many keys in key order, so two transactions locking overlapping
    /// sets cannot wait on each other.
    pub async fn lock_rows<R, I>(&mut self, keys: I) -> Result<()>
    where
        R: Row,
        I: IntoIterator<Item = R::Key>,
    {
        self.ensure_active()?;
        let ordered: BTreeSet<LockKey> = keys.into_iter().map(|key| R::lock_key(&key)).collect();
        for key in ordered {
            self.lock(key).await?;
        }
        Ok(())
    }

    /// Committed rows matching the predicate, overlaid with staged changes.
    pub async fn scan<R, F>(&self, predicate: F) -> Result<Vec<R>>
    where
        R: Row,
        F: Fn(&R) -> bool,
    {
        self.ensure_active()?;
        let mut rows: BTreeMap<R::Key, R> = self
            .shared
            .storage
            .scan::<R, _>(|_| true)
            .await
            .into_iter()
            .map(|row| (row.key(), row))
            .collect();
        for change in self.changes.iter().filter_map(R::unwrap) {
            match change {
                RowChange::Insert(row) | RowChange::Update(row) => {
                    rows.insert(row.key(), row.clone());
                }
                RowChange::Delete(key) => {
                    rows.remove(key);
                }
            }
        }
        Ok(rows.into_values().filter(|row| predicate(row)).collect())
    }

    pub async fn insert<R: Row>(&mut self, row: R) -> Result<()> {
        let key = row.key();
        if self.select_for_update::<R>(&key).await?.is_some() {
            return Err(DbError::ResourceExists);
        }
        self.changes.push(R::wrap(RowChange::Insert(row)));
        Ok(())
    }

    pub async fn update<R: Row>(&mut self, row: R) -> Result<()> {
        let key = row.key();
        if self.select_for_update::<R>(&key).await?.is_none() {
            return Err(DbError::ResourceNotFound);
        }
        self.changes.push(R::wrap(RowChange::Update(row)));
        Ok(())
    }

    /// Returns whether a row was there to delete.
    pub async fn delete<R: Row>(&mut self, key: &R::Key) -> Result<bool> {
        if self.select_for_update::<R>(key).await?.is_none() {
            return Ok(false);
        }
        self.changes.push(R::wrap(RowChange::Delete(key.clone())));
        Ok(true)
    }

    /// Applies every staged change atomically, then releases the row locks.
    pub async fn commit(mut self) -> Result<()> {
        self.ensure_active()?;
        let changes = std::mem::take(&mut self.changes);
        self.shared.storage.apply(&changes).await;
        self.state = TransactionState::Committed;
        self.shared.finish(self.id, self.state);
        debug!(
            txn = %self.id,
            changes = changes.len(),
            elapsed_us = u64::try_from(self.start_time.elapsed().as_micros()).unwrap_or(u64::MAX),
            "transaction committed"
        );
        Ok(())
    }

    pub fn rollback(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if !self.state.is_active() {
            return;
        }
        self.changes.clear();
        self.state = TransactionState::Aborted;
        self.shared.finish(self.id, self.state);
        debug!(txn = %self.id, "transaction rolled back");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.abort();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("changes", &self.changes.len())
            .field("locks", &self.locks.len())
            .finish()
    }
}

use super::rows::{ActualLrpRow, DesiredLrpRow, DomainRow, Row, TaskRow};
use super::table::Table;
use crate::transaction::Change;
use tokio::sync::RwLock;

/// Committed state of every table.
///
/// Reads hold the commit lock shared, so a reader never observes half of a
/// multi-row commit.
pub struct InMemoryStorage {
    pub(crate) actual_lrps: RwLock<Table<ActualLrpRow>>,
    pub(crate) tasks: RwLock<Table<TaskRow>>,
    pub(crate) desired_lrps: RwLock<Table<DesiredLrpRow>>,
    pub(crate) domains: RwLock<Table<DomainRow>>,
    commit_lock: RwLock<()>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            actual_lrps: RwLock::new(Table::new()),
            tasks: RwLock::new(Table::new()),
            desired_lrps: RwLock::new(Table::new()),
            domains: RwLock::new(Table::new()),
            commit_lock: RwLock::new(()),
        }
    }

    pub async fn get<R: Row>(&self, key: &R::Key) -> Option<R> {
        let _commit = self.commit_lock.read().await;
        let table = R::table(self).read().await;
        table.get(key).cloned()
    }

    pub async fn scan<R, F>(&self, predicate: F) -> Vec<R>
    where
        R: Row,
        F: Fn(&R) -> bool,
    {
        let _commit = self.commit_lock.read().await;
        let table = R::table(self).read().await;
        table.scan_where(predicate)
    }

    pub async fn row_count<R: Row>(&self) -> usize {
        let _commit = self.commit_lock.read().await;
        R::table(self).read().await.row_count()
    }

    /// Applies a transaction's changes in order as one atomic step.
    pub async fn apply(&self, changes: &[Change]) {
        let _commit = self.commit_lock.write().await;
        for change in changes {
            match change {
                Change::ActualLrp(change) => self.actual_lrps.write().await.apply(change),
                Change::Task(change) => self.tasks.write().await.apply(change),
                Change::DesiredLrp(change) => self.desired_lrps.write().await.apply(change),
                Change::Domain(change) => self.domains.write().await.apply(change),
            }
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

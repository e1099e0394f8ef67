// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Changes are staged in order inside a transaction and applied to the
// committed tables only on commit. Rolling back discards them.
//
// ============================================================================

use crate::storage::{ActualLrpRow, DesiredLrpRow, DomainRow, Row, TaskRow};

/// A staged change to one row of table `R`.
#[derive(Debug, Clone)]
pub enum RowChange<R: Row> {
    Insert(R),
    Update(R),
    Delete(R::Key),
}

impl<R: Row> RowChange<R> {
    pub fn key(&self) -> R::Key {
        match self {
            RowChange::Insert(row) | RowChange::Update(row) => row.key(),
            RowChange::Delete(key) => key.clone(),
        }
    }

    /// The row as it stands after the change; `None` for a delete.
    pub fn row(&self) -> Option<&R> {
        match self {
            RowChange::Insert(row) | RowChange::Update(row) => Some(row),
            RowChange::Delete(_) => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, RowChange::Delete(_))
    }
}

#[derive(Debug, Clone)]
pub enum Change {
    ActualLrp(RowChange<ActualLrpRow>),
    Task(RowChange<TaskRow>),
    DesiredLrp(RowChange<DesiredLrpRow>),
    Domain(RowChange<DomainRow>),
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &'static str {
        match self {
            Change::ActualLrp(_) => ActualLrpRow::TABLE,
            Change::Task(_) => TaskRow::TABLE,
            Change::DesiredLrp(_) => DesiredLrpRow::TABLE,
            Change::Domain(_) => DomainRow::TABLE,
        }
    }

    pub fn is_delete(&self) -> bool {
        match self {
            Change::ActualLrp(change) => change.is_delete(),
            Change::Task(change) => change.is_delete(),
            Change::DesiredLrp(change) => change.is_delete(),
            Change::Domain(change) => change.is_delete(),
        }
    }
}

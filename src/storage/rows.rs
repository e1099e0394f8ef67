// ============================================================================
// Stored Row Layouts
// ============================================================================
//
// Rows keep the flat column layout of the store; blob columns hold payloads
// encoded by the versioned codec and are only decoded on read.
//
// ============================================================================

use super::InMemoryStorage;
use super::locks::LockKey;
use super::table::Table;
use crate::models::Presence;
use crate::transaction::{Change, RowChange};
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use tokio::sync::RwLock;

/// A row type with its own table in [`InMemoryStorage`].
pub trait Row: Clone + Debug + Send + Sync + 'static {
    type Key: Ord + Clone + Debug + Send + Sync;

    const TABLE: &'static str;

    fn key(&self) -> Self::Key;

    fn lock_key(key: &Self::Key) -> LockKey;

    fn table(storage: &InMemoryStorage) -> &RwLock<Table<Self>>;

    fn wrap(change: RowChange<Self>) -> Change;

    fn unwrap(change: &Change) -> Option<&RowChange<Self>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActualLrpRowKey {
    pub process_guid: String,
    pub index: i32,
    pub presence: Presence,
}

impl ActualLrpRowKey {
    pub fn new(process_guid: &str, index: i32, presence: Presence) -> Self {
        Self {
            process_guid: process_guid.to_string(),
            index,
            presence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualLrpRow {
    pub process_guid: String,
    pub instance_index: i32,
    pub presence: Presence,
    pub domain: String,
    pub instance_guid: String,
    pub cell_id: String,
    pub state: String,
    /// Encoded net info; empty unless the instance is running.
    pub net_info: Vec<u8>,
    pub placement_error: String,
    pub since: DateTime<Utc>,
    pub crash_count: u32,
    pub crash_reason: String,
    pub modification_tag_epoch: String,
    pub modification_tag_index: u32,
}

impl Row for ActualLrpRow {
    type Key = ActualLrpRowKey;

    const TABLE: &'static str = "actual_lrps";

    fn key(&self) -> ActualLrpRowKey {
        ActualLrpRowKey::new(&self.process_guid, self.instance_index, self.presence)
    }

    fn lock_key(key: &ActualLrpRowKey) -> LockKey {
        LockKey::ActualLrp(key.clone())
    }

    fn table(storage: &InMemoryStorage) -> &RwLock<Table<Self>> {
        &storage.actual_lrps
    }

    fn wrap(change: RowChange<Self>) -> Change {
        Change::ActualLrp(change)
    }

    fn unwrap(change: &Change) -> Option<&RowChange<Self>> {
        match change {
            Change::ActualLrp(change) => Some(change),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub guid: String,
    pub domain: String,
    pub state: String,
    pub cell_id: String,
    pub result: String,
    pub failed: bool,
    pub failure_reason: String,
    /// Encoded task definition.
    pub task_definition: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_completed_at: Option<DateTime<Utc>>,
}

impl Row for TaskRow {
    type Key = String;

    const TABLE: &'static str = "tasks";

    fn key(&self) -> String {
        self.guid.clone()
    }

    fn lock_key(key: &String) -> LockKey {
        LockKey::Task(key.clone())
    }

    fn table(storage: &InMemoryStorage) -> &RwLock<Table<Self>> {
        &storage.tasks
    }

    fn wrap(change: RowChange<Self>) -> Change {
        Change::Task(change)
    }

    fn unwrap(change: &Change) -> Option<&RowChange<Self>> {
        match change {
            Change::Task(change) => Some(change),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredLrpRow {
    pub process_guid: String,
    pub domain: String,
    pub instances: i32,
    pub memory_mb: i32,
    pub disk_mb: i32,
    pub max_pids: i32,
    pub annotation: String,
    /// Encoded routes.
    pub routes: Vec<u8>,
    pub modification_tag_epoch: String,
    pub modification_tag_index: u32,
}

impl Row for DesiredLrpRow {
    type Key = String;

    const TABLE: &'static str = "desired_lrps";

    fn key(&self) -> String {
        self.process_guid.clone()
    }

    fn lock_key(key: &String) -> LockKey {
        LockKey::DesiredLrp(key.clone())
    }

    fn table(storage: &InMemoryStorage) -> &RwLock<Table<Self>> {
        &storage.desired_lrps
    }

    fn wrap(change: RowChange<Self>) -> Change {
        Change::DesiredLrp(change)
    }

    fn unwrap(change: &Change) -> Option<&RowChange<Self>> {
        match change {
            Change::DesiredLrp(change) => Some(change),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRow {
    pub name: String,
    pub expire_time: Option<DateTime<Utc>>,
}

impl Row for DomainRow {
    type Key = String;

    const TABLE: &'static str = "domains";

    fn key(&self) -> String {
        self.name.clone()
    }

    fn lock_key(key: &String) -> LockKey {
        LockKey::Domain(key.clone())
    }

    fn table(storage: &InMemoryStorage) -> &RwLock<Table<Self>> {
        &storage.domains
    }

    fn wrap(change: RowChange<Self>) -> Change {
        Change::Domain(change)
    }

    fn unwrap(change: &Change) -> Option<&RowChange<Self>> {
        match change {
            Change::Domain(change) => Some(change),
            _ => None,
        }
    }
}

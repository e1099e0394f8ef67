// ============================================================================
// Row <-> Model Conversion
// ============================================================================
//
// Decoding fails with `Deserialize` for unreadable blobs and `InvalidRecord`
// for impossible column combinations. Bulk reads heal such rows by deleting
// them; single-key reads surface the error.
//
// ============================================================================

use super::StateDb;
use crate::core::{Codec, DbError, Result};
use crate::models::{
    ActualLrp, ActualLrpKey, ActualLrpState, DesiredLrpSchedulingInfo, Domain, InstanceIdentity,
    ModificationTag, Resource, StateKind, Task, TaskState,
};
use crate::storage::{ActualLrpRow, ActualLrpRowKey, DesiredLrpRow, DomainRow, Row, TaskRow};
use tracing::{Level, event};

/// A model stored as one row of `Self::Row`.
pub(crate) trait Record: Sized + Send + Sync + 'static {
    type Row: Row;

    fn encode(&self, codec: &Codec) -> Result<Self::Row>;

    fn decode(row: &Self::Row, codec: &Codec) -> Result<Self>;
}

/// Outcome of a single-key read.
#[derive(Debug)]
pub(crate) enum Lookup<T> {
    Found(T),
    Corrupt(DbError),
    NotFound,
}

impl<T> Lookup<T> {
    pub(crate) fn into_result(self) -> Result<T> {
        match self {
            Lookup::Found(record) => Ok(record),
            Lookup::Corrupt(err) => Err(err),
            Lookup::NotFound => Err(DbError::ResourceNotFound),
        }
    }

    pub(crate) fn into_option(self) -> Result<Option<T>> {
        match self {
            Lookup::Found(record) => Ok(Some(record)),
            Lookup::Corrupt(err) => Err(err),
            Lookup::NotFound => Ok(None),
        }
    }
}

impl<T> From<Option<Result<T>>> for Lookup<T> {
    fn from(decoded: Option<Result<T>>) -> Self {
        match decoded {
            None => Lookup::NotFound,
            Some(Ok(record)) => Lookup::Found(record),
            Some(Err(err)) => Lookup::Corrupt(err),
        }
    }
}

/// Valid records of a bulk read plus how many corrupt rows it removed.
#[derive(Debug)]
pub(crate) struct Scan<T> {
    pub(crate) records: Vec<T>,
    pub(crate) invalid: usize,
}

fn invalid(what: &str, key: impl std::fmt::Debug) -> DbError {
    DbError::InvalidRecord(format!("{} {:?}", what, key))
}

impl Record for ActualLrp {
    type Row = ActualLrpRow;

    fn encode(&self, codec: &Codec) -> Result<ActualLrpRow> {
        let identity = self.identity().cloned().unwrap_or_default();
        let net_info = match self.state.net_info() {
            Some(net_info) => codec.marshal(net_info)?,
            None => Vec::new(),
        };
        Ok(ActualLrpRow {
            process_guid: self.key.process_guid.clone(),
            instance_index: self.key.index,
            presence: self.presence,
            domain: self.key.domain.clone(),
            instance_guid: identity.instance_guid,
            cell_id: identity.cell_id,
            state: self.kind().as_str().to_string(),
            net_info,
            placement_error: self.state.placement_error().unwrap_or_default().to_string(),
            since: self.since,
            crash_count: self.crash_count,
            crash_reason: self.crash_reason.clone(),
            modification_tag_epoch: self.modification_tag.epoch.clone(),
            modification_tag_index: self.modification_tag.index,
        })
    }

    fn decode(row: &ActualLrpRow, codec: &Codec) -> Result<ActualLrp> {
        let kind = StateKind::parse(&row.state)
            .ok_or_else(|| invalid(&format!("unknown state {:?} for", row.state), row.key()))?;
        let identity = InstanceIdentity::new(&row.instance_guid, &row.cell_id);
        let owned = !row.instance_guid.is_empty() && !row.cell_id.is_empty();

        let state = match kind {
            StateKind::Unclaimed => ActualLrpState::Unclaimed {
                placement_error: (!row.placement_error.is_empty())
                    .then(|| row.placement_error.clone()),
            },
            StateKind::Claimed if owned => ActualLrpState::Claimed { instance: identity },
            StateKind::Running if owned => ActualLrpState::Running {
                instance: identity,
                net_info: codec.unmarshal(&row.net_info)?,
            },
            StateKind::Claimed | StateKind::Running => {
                return Err(invalid("missing instance identity for", row.key()));
            }
            StateKind::Crashed => ActualLrpState::Crashed,
        };

        Ok(ActualLrp {
            key: ActualLrpKey::new(&row.process_guid, row.instance_index, &row.domain),
            state,
            presence: row.presence,
            since: row.since,
            crash_count: row.crash_count,
            crash_reason: row.crash_reason.clone(),
            modification_tag: ModificationTag {
                epoch: row.modification_tag_epoch.clone(),
                index: row.modification_tag_index,
            },
        })
    }
}

impl Record for Task {
    type Row = TaskRow;

    fn encode(&self, codec: &Codec) -> Result<TaskRow> {
        Ok(TaskRow {
            guid: self.guid.clone(),
            domain: self.domain.clone(),
            state: self.state.as_str().to_string(),
            cell_id: self.cell_id.clone(),
            result: self.result.clone(),
            failed: self.failed,
            failure_reason: self.failure_reason.clone(),
            task_definition: codec.marshal(&self.definition)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            first_completed_at: self.first_completed_at,
        })
    }

    fn decode(row: &TaskRow, codec: &Codec) -> Result<Task> {
        let state = TaskState::parse(&row.state)
            .ok_or_else(|| invalid(&format!("unknown state {:?} for task", row.state), &row.guid))?;
        Ok(Task {
            guid: row.guid.clone(),
            domain: row.domain.clone(),
            definition: codec.unmarshal(&row.task_definition)?,
            state,
            cell_id: row.cell_id.clone(),
            result: row.result.clone(),
            failed: row.failed,
            failure_reason: row.failure_reason.clone(),
            created_at: row.created_at,
            updated_at: row.updated_at,
            first_completed_at: row.first_completed_at,
        })
    }
}

impl Record for DesiredLrpSchedulingInfo {
    type Row = DesiredLrpRow;

    fn encode(&self, codec: &Codec) -> Result<DesiredLrpRow> {
        Ok(DesiredLrpRow {
            process_guid: self.process_guid.clone(),
            domain: self.domain.clone(),
            instances: self.instances,
            memory_mb: self.resource.memory_mb,
            disk_mb: self.resource.disk_mb,
            max_pids: self.resource.max_pids,
            annotation: self.annotation.clone(),
            routes: codec.marshal(&self.routes)?,
            modification_tag_epoch: self.modification_tag.epoch.clone(),
            modification_tag_index: self.modification_tag.index,
        })
    }

    fn decode(row: &DesiredLrpRow, codec: &Codec) -> Result<DesiredLrpSchedulingInfo> {
        Ok(DesiredLrpSchedulingInfo {
            process_guid: row.process_guid.clone(),
            domain: row.domain.clone(),
            instances: row.instances,
            resource: Resource {
                memory_mb: row.memory_mb,
                disk_mb: row.disk_mb,
                max_pids: row.max_pids,
            },
            routes: codec.unmarshal(&row.routes)?,
            annotation: row.annotation.clone(),
            modification_tag: ModificationTag {
                epoch: row.modification_tag_epoch.clone(),
                index: row.modification_tag_index,
            },
        })
    }
}

impl Record for Domain {
    type Row = DomainRow;

    fn encode(&self, _codec: &Codec) -> Result<DomainRow> {
        Ok(DomainRow {
            name: self.name.clone(),
            expire_time: self.expires_at,
        })
    }

    fn decode(row: &DomainRow, _codec: &Codec) -> Result<Domain> {
        Ok(Domain {
            name: row.name.clone(),
            expires_at: row.expire_time,
        })
    }
}

impl StateDb {
    pub(crate) fn encode<T: Record>(&self, record: &T) -> Result<T::Row> {
        record.encode(&self.codec)
    }

    pub(crate) fn decode<T: Record>(&self, row: &T::Row) -> Result<T> {
        T::decode(row, &self.codec)
    }

    /// Reads one record without locking it.
    pub(crate) async fn lookup<T: Record>(&self, key: &<T::Row as Row>::Key) -> Lookup<T> {
        let row = self.transactions.storage().get::<T::Row>(key).await;
        row.map(|row| self.decode::<T>(&row)).into()
    }

    /// Locks and reads one record inside `txn`.
    pub(crate) async fn lookup_for_update<T: Record>(
        &self,
        txn: &mut crate::transaction::Transaction,
        key: &<T::Row as Row>::Key,
    ) -> Result<Option<T>> {
        let row = txn.select_for_update::<T::Row>(key).await?;
        Lookup::from(row.map(|row| self.decode::<T>(&row))).into_option()
    }

    pub(crate) async fn lookup_lrp_for_update(
        &self,
        txn: &mut crate::transaction::Transaction,
        key: &ActualLrpKey,
        presence: crate::models::Presence,
    ) -> Result<Option<ActualLrp>> {
        let row_key = ActualLrpRowKey::new(&key.process_guid, key.index, presence);
        self.lookup_for_update::<ActualLrp>(txn, &row_key).await
    }

    /// Reads every matching record, deleting rows that no longer decode.
    pub(crate) async fn scan_records<T, P>(&self, predicate: P) -> Scan<T>
    where
        T: Record,
        P: Fn(&T::Row) -> bool + Send,
    {
        let rows = self.transactions.storage().scan::<T::Row, _>(predicate).await;
        let mut records = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for row in rows {
            match self.decode::<T>(&row) {
                Ok(record) => records.push(record),
                Err(err) => {
                    event!(
                        Level::WARN,
                        table = <T::Row as Row>::TABLE,
                        key = ?row.key(),
                        error = %err,
                        "deleting-invalid-record"
                    );
                    corrupt.push(row.key());
                }
            }
        }
        let invalid = self.delete_invalid::<T>(corrupt).await;
        Scan { records, invalid }
    }

    /// Deletes rows that still fail to decode once locked; a row rewritten
    /// since the scan is left alone.
    async fn delete_invalid<T: Record>(&self, keys: Vec<<T::Row as Row>::Key>) -> usize {
        if keys.is_empty() {
            return 0;
        }
        let mut txn = self.begin();
        if let Err(err) = txn.lock_rows::<T::Row, _>(keys.iter().cloned()).await {
            event!(Level::ERROR, error = %err, "failed-locking-invalid-records");
            return 0;
        }

        let mut removed = 0;
        for key in &keys {
            let still_invalid = match txn.get::<T::Row>(key).await {
                Ok(Some(row)) => self.decode::<T>(&row).is_err(),
                Ok(None) => false,
                Err(err) => {
                    event!(Level::ERROR, error = %err, "failed-reading-invalid-record");
                    false
                }
            };
            if still_invalid && matches!(txn.delete::<T::Row>(key).await, Ok(true)) {
                removed += 1;
            }
        }

        match txn.commit().await {
            Ok(()) => removed,
            Err(err) => {
                event!(Level::ERROR, error = %err, "failed-deleting-invalid-records");
                0
            }
        }
    }
}

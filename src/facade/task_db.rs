use super::{StateDb, TaskDb, TaskFilter};
use crate::core::{DbError, Result};
use crate::models::actual_lrp::validate_identifier;
use crate::models::task::{validate_failure_reason, validate_task_guid};
use crate::models::{Task, TaskDefinition, TaskState};
use crate::storage::TaskRow;
use crate::transaction::Transaction;
use async_trait::async_trait;
use tracing::{Instrument, Level, event, info_span};

pub const CANCELLED_FAILURE_REASON: &str = "task was cancelled";

impl StateDb {
    async fn task_for_update(&self, txn: &mut Transaction, guid: &str) -> Result<Task> {
        validate_task_guid(guid)?;
        self.lookup_for_update::<Task>(txn, &guid.to_string())
            .await?
            .ok_or(DbError::ResourceNotFound)
    }

    pub(crate) async fn write_task(&self, mut txn: Transaction, task: &Task) -> Result<()> {
        txn.update(self.encode(task)?).await?;
        txn.commit().await
    }

    /// Shared by fail and cancel: both end a pending or running task.
    async fn abort_task(&self, guid: &str, failure_reason: &str) -> Result<(Task, Task)> {
        let mut txn = self.begin();
        let before = self.task_for_update(&mut txn, guid).await?;
        if let Err(err) = before.validate_abort() {
            event!(Level::WARN, state = %before.state, "cannot-fail-task");
            return Err(err);
        }

        let mut after = before.clone();
        after.complete(true, failure_reason, "", self.now());
        self.write_task(txn, &after).await?;
        Ok((before, after))
    }
}

#[async_trait]
impl TaskDb for StateDb {
    async fn tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let filter = filter.clone();
        let scan = self
            .scan_records::<Task, _>(move |row: &TaskRow| filter.matches(row))
            .await;
        Ok(scan.records)
    }

    async fn task_by_guid(&self, guid: &str) -> Result<Task> {
        validate_task_guid(guid)?;
        self.lookup::<Task>(&guid.to_string()).await.into_result()
    }

    async fn desire_task(
        &self,
        definition: &TaskDefinition,
        guid: &str,
        domain: &str,
    ) -> Result<Task> {
        let span = info_span!("desire-task", task_guid = %guid, domain = %domain);
        async move {
            validate_task_guid(guid)?;
            validate_identifier("domain", domain)?;
            let task = Task::new_pending(guid, domain, definition.clone(), self.now());

            let mut txn = self.begin();
            txn.insert(self.encode(&task)?).await?;
            txn.commit().await?;
            event!(Level::DEBUG, "desired");
            Ok(task)
        }
        .instrument(span)
        .await
    }

    async fn start_task(&self, guid: &str, cell_id: &str) -> Result<(Task, Task, bool)> {
        let span = info_span!("start-task", task_guid = %guid, cell_id = %cell_id);
        async move {
            validate_identifier("cell_id", cell_id)?;
            let mut txn = self.begin();
            let before = self.task_for_update(&mut txn, guid).await?;

            if before.state == TaskState::Running && before.cell_id == cell_id {
                event!(Level::DEBUG, "task-already-running-on-cell");
                return Ok((before.clone(), before, false));
            }
            if let Err(err) = before.validate_transition_to(TaskState::Running) {
                event!(Level::WARN, state = %before.state, "cannot-start-task");
                return Err(err);
            }

            let mut after = before.clone();
            after.state = TaskState::Running;
            after.cell_id = cell_id.to_string();
            after.updated_at = self.now();
            self.write_task(txn, &after).await?;
            Ok((before, after, true))
        }
        .instrument(span)
        .await
    }

    async fn cancel_task(&self, guid: &str) -> Result<(Task, Task, String)> {
        let span = info_span!("cancel-task", task_guid = %guid);
        async move {
            let (before, after) = self.abort_task(guid, CANCELLED_FAILURE_REASON).await?;
            let cell_id = before.cell_id.clone();
            Ok((before, after, cell_id))
        }
        .instrument(span)
        .await
    }

    async fn fail_task(&self, guid: &str, failure_reason: &str) -> Result<(Task, Task)> {
        let span = info_span!("fail-task", task_guid = %guid);
        async move {
            validate_failure_reason(failure_reason)?;
            self.abort_task(guid, failure_reason).await
        }
        .instrument(span)
        .await
    }

    async fn complete_task(
        &self,
        guid: &str,
        cell_id: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<(Task, Task)> {
        let span = info_span!("complete-task", task_guid = %guid, cell_id = %cell_id);
        async move {
            validate_identifier("cell_id", cell_id)?;
            validate_failure_reason(failure_reason)?;
            let mut txn = self.begin();
            let before = self.task_for_update(&mut txn, guid).await?;

            if before.state == TaskState::Running && before.cell_id != cell_id {
                event!(Level::WARN, owner = %before.cell_id, "running-on-different-cell");
                return Err(DbError::RunningOnDifferentCell {
                    expected: before.cell_id.clone(),
                    got: cell_id.to_string(),
                });
            }
            if let Err(err) = before.validate_transition_to(TaskState::Completed) {
                event!(Level::WARN, state = %before.state, "cannot-complete-task");
                return Err(err);
            }

            let mut after = before.clone();
            after.complete(failed, failure_reason, result, self.now());
            self.write_task(txn, &after).await?;
            Ok((before, after))
        }
        .instrument(span)
        .await
    }

    async fn resolving_task(&self, guid: &str) -> Result<(Task, Task)> {
        let span = info_span!("resolving-task", task_guid = %guid);
        async move {
            let mut txn = self.begin();
            let before = self.task_for_update(&mut txn, guid).await?;
            if let Err(err) = before.validate_transition_to(TaskState::Resolving) {
                event!(Level::WARN, state = %before.state, "cannot-resolve-task");
                return Err(err);
            }

            let mut after = before.clone();
            after.state = TaskState::Resolving;
            after.updated_at = self.now();
            self.write_task(txn, &after).await?;
            Ok((before, after))
        }
        .instrument(span)
        .await
    }

    async fn delete_task(&self, guid: &str) -> Result<Task> {
        let span = info_span!("delete-task", task_guid = %guid);
        async move {
            let mut txn = self.begin();
            let before = self.task_for_update(&mut txn, guid).await?;
            if before.state != TaskState::Resolving {
                event!(Level::WARN, state = %before.state, "cannot-delete-task");
                return Err(DbError::InvalidStateTransition {
                    from: before.state,
                    to: TaskState::Resolving,
                });
            }

            txn.delete::<TaskRow>(&before.guid).await?;
            txn.commit().await?;
            event!(Level::DEBUG, "deleted");
            Ok(before)
        }
        .instrument(span)
        .await
    }
}

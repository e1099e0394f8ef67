//! Task convergence.
//!
//! Unlike the LRP sweep this one mutates: expired work is failed, abandoned
//! resolutions are demoted and old completions deleted. Every mutation locks
//! the task and re-checks the condition that selected it.

use crate::config::TaskConvergenceConfig;
use crate::core::clock::elapsed_between;
use crate::core::{DbError, Result};
use crate::facade::StateDb;
use crate::metrics::{self, emit};
use crate::models::{CellSet, Event, Task, TaskStartRequest, TaskState};
use crate::storage::TaskRow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{Instrument, Level, event, info_span};

pub const EXPIRED_FAILURE_REASON: &str = "not started within time limit";
pub const CELL_DISAPPEARED_FAILURE_REASON: &str = "cell disappeared before completion";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskConvergenceMetrics {
    /// Pending tasks handed back to the auctioneer plus completions re-delivered.
    pub kicked: u64,
    /// Completed tasks deleted after expiring.
    pub pruned: u64,
    /// Rows deleted because they no longer decode.
    pub invalid: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskConvergenceResult {
    pub tasks_to_auction: Vec<TaskStartRequest>,
    pub tasks_to_complete: Vec<Task>,
    pub events: Vec<Event>,
    pub metrics: TaskConvergenceMetrics,
}

#[async_trait]
pub trait TaskConvergence: Send + Sync {
    async fn converge_tasks(
        &self,
        cells: &CellSet,
        config: &TaskConvergenceConfig,
    ) -> TaskConvergenceResult;
}

fn older_than(at: DateTime<Utc>, now: DateTime<Utc>, age: Duration) -> bool {
    elapsed_between(at, now) > age
}

fn in_state(row: &TaskRow, state: TaskState) -> bool {
    row.state == state.as_str()
}

impl StateDb {
    /// Scans tasks in one state, counting the corrupt rows the scan removed.
    async fn tasks_where<P>(&self, predicate: P, invalid: &mut u64) -> Vec<Task>
    where
        P: Fn(&TaskRow) -> bool + Send,
    {
        let scan = self.scan_records::<Task, _>(predicate).await;
        *invalid += scan.invalid as u64;
        scan.records
    }

    /// Applies `mutate` to the locked task if `still_applies` holds for it.
    async fn converge_task<C, M>(&self, guid: &str, still_applies: C, mutate: M) -> Result<Option<(Task, Task)>>
    where
        C: Fn(&Task) -> bool + Send,
        M: FnOnce(&mut Task) + Send,
    {
        let mut txn = self.begin();
        let Some(before) = self
            .lookup_for_update::<Task>(&mut txn, &guid.to_string())
            .await?
        else {
            return Ok(None);
        };
        if !still_applies(&before) {
            return Ok(None);
        }
        let mut after = before.clone();
        mutate(&mut after);
        self.write_task(txn, &after).await?;
        Ok(Some((before, after)))
    }

    async fn converge_each<C, M>(
        &self,
        step: &'static str,
        tasks: Vec<Task>,
        still_applies: C,
        mutate: M,
    ) -> Vec<Event>
    where
        C: Fn(&Task) -> bool + Send + Sync,
        M: Fn(&mut Task) + Send + Sync,
    {
        let mut events = Vec::new();
        for task in tasks {
            match self.converge_task(&task.guid, &still_applies, &mutate).await {
                Ok(Some((before, after))) => events.extend(Event::task_changed(&before, &after)),
                Ok(None) => event!(Level::DEBUG, step, task_guid = %task.guid, "task-changed-concurrently"),
                Err(err) => event!(Level::ERROR, step, task_guid = %task.guid, error = %err, "failed-converging-task"),
            }
        }
        events
    }

    async fn delete_expired_completed(&self, tasks: Vec<Task>, expire: Duration) -> Vec<Event> {
        let mut events = Vec::new();
        for task in tasks {
            match self.delete_if_expired(&task.guid, expire).await {
                Ok(Some(removed)) => events.push(Event::TaskRemoved { task: removed }),
                Ok(None) => {}
                Err(err) => event!(Level::ERROR, task_guid = %task.guid, error = %err, "failed-deleting-expired-task"),
            }
        }
        events
    }

    async fn delete_if_expired(&self, guid: &str, expire: Duration) -> Result<Option<Task>> {
        let now = self.now();
        let mut txn = self.begin();
        let Some(task) = self
            .lookup_for_update::<Task>(&mut txn, &guid.to_string())
            .await?
        else {
            return Ok(None);
        };
        let expired = task.state == TaskState::Completed
            && task
                .first_completed_at
                .is_some_and(|at| older_than(at, now, expire));
        if !expired {
            return Ok(None);
        }
        if !txn.delete::<TaskRow>(&task.guid).await? {
            return Err(DbError::ResourceNotFound);
        }
        txn.commit().await?;
        Ok(Some(task))
    }

    async fn emit_task_state_gauges(&self) {
        let tasks = self.scan_records::<Task, _>(|_: &TaskRow| true).await.records;
        let count = |state: TaskState| tasks.iter().filter(|task| task.state == state).count() as i64;
        for (name, state) in [
            (metrics::TASKS_PENDING, TaskState::Pending),
            (metrics::TASKS_RUNNING, TaskState::Running),
            (metrics::TASKS_COMPLETED, TaskState::Completed),
            (metrics::TASKS_RESOLVING, TaskState::Resolving),
        ] {
            emit(name, self.metrics.send_gauge(name, count(state)));
        }
    }
}

#[async_trait]
impl TaskConvergence for StateDb {
    async fn converge_tasks(
        &self,
        cells: &CellSet,
        config: &TaskConvergenceConfig,
    ) -> TaskConvergenceResult {
        let span = info_span!("converge-tasks", cells = cells.len());
        async move {
            let started = Instant::now();
            emit(
                metrics::CONVERGENCE_TASK_RUNS,
                self.metrics
                    .increment_counter(metrics::CONVERGENCE_TASK_RUNS, 1),
            );
            let (kick, expire_pending, expire_completed) =
                (config.kick(), config.expire_pending(), config.expire_completed());
            let now = self.now();
            let mut result = TaskConvergenceResult::default();
            let mut invalid = 0u64;

            let expired_pending = |task: &Task| {
                task.state == TaskState::Pending && older_than(task.created_at, now, expire_pending)
            };
            let expired = self
                .tasks_where(
                    |row: &TaskRow| {
                        in_state(row, TaskState::Pending) && older_than(row.created_at, now, expire_pending)
                    },
                    &mut invalid,
                )
                .await;
            result.events.extend(
                self.converge_each("fail-expired-pending-tasks", expired, expired_pending, |task| {
                    task.complete(true, EXPIRED_FAILURE_REASON, "", now)
                })
                .await,
            );

            result.tasks_to_auction = self
                .tasks_where(
                    |row: &TaskRow| {
                        in_state(row, TaskState::Pending)
                            && older_than(row.updated_at, now, kick)
                            && !older_than(row.created_at, now, expire_pending)
                    },
                    &mut invalid,
                )
                .await
                .iter()
                .map(TaskStartRequest::from)
                .collect();

            let cell_missing = |task: &Task| task.state == TaskState::Running && !cells.has_cell_id(&task.cell_id);
            let orphaned = self
                .tasks_where(
                    |row: &TaskRow| in_state(row, TaskState::Running) && !cells.has_cell_id(&row.cell_id),
                    &mut invalid,
                )
                .await;
            result.events.extend(
                self.converge_each("fail-tasks-with-disappeared-cells", orphaned, cell_missing, |task| {
                    task.complete(true, CELL_DISAPPEARED_FAILURE_REASON, "", now)
                })
                .await,
            );

            // Demoted tasks keep their updated_at, so the completion step
            // below picks them up for re-delivery in this same sweep.
            let abandoned = |task: &Task| task.state == TaskState::Resolving && older_than(task.updated_at, now, kick);
            let resolving = self
                .tasks_where(
                    |row: &TaskRow| in_state(row, TaskState::Resolving) && older_than(row.updated_at, now, kick),
                    &mut invalid,
                )
                .await;
            result.events.extend(
                self.converge_each("demote-kickable-resolving-tasks", resolving, abandoned, |task| {
                    task.state = TaskState::Completed
                })
                .await,
            );

            let expired_completed = self
                .tasks_where(
                    |row: &TaskRow| {
                        in_state(row, TaskState::Completed)
                            && row
                                .first_completed_at
                                .is_some_and(|at| older_than(at, now, expire_completed))
                    },
                    &mut invalid,
                )
                .await;
            let removed = self.delete_expired_completed(expired_completed, expire_completed).await;
            result.metrics.pruned = removed.len() as u64;
            result.events.extend(removed);

            result.tasks_to_complete = self
                .tasks_where(
                    |row: &TaskRow| in_state(row, TaskState::Completed) && older_than(row.updated_at, now, kick),
                    &mut invalid,
                )
                .await;

            result.metrics.kicked = (result.tasks_to_auction.len() + result.tasks_to_complete.len()) as u64;
            result.metrics.invalid = invalid;

            for (name, value) in [
                (metrics::CONVERGENCE_TASKS_KICKED, result.metrics.kicked),
                (metrics::CONVERGENCE_TASKS_PRUNED, result.metrics.pruned),
                (metrics::CONVERGENCE_TASKS_INVALID, result.metrics.invalid),
            ] {
                emit(name, self.metrics.increment_counter(name, value));
            }
            self.emit_task_state_gauges().await;
            emit(
                metrics::CONVERGENCE_TASK_DURATION,
                self.metrics
                    .send_duration(metrics::CONVERGENCE_TASK_DURATION, started.elapsed()),
            );
            event!(
                Level::INFO,
                to_auction = result.tasks_to_auction.len(),
                to_complete = result.tasks_to_complete.len(),
                events = result.events.len(),
                pruned = result.metrics.pruned,
                invalid = result.metrics.invalid,
                "converged-tasks"
            );
            result
        }
        .instrument(span)
        .await
    }
}

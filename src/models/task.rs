use super::actual_lrp::validate_identifier;
use crate::core::{DbError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest failure reason a caller may report for a task.
pub const MAX_FAILURE_REASON_LENGTH: usize = 1024;

/// Task lifecycle:
/// ```text
/// Pending ──start──> Running ──complete──> Completed ──resolve──> Resolving ──delete──> (gone)
///    │                  │                      ▲                      │
///    └──cancel/fail─────┴──cancel/fail─────────┘<────convergence──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Resolving,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Completed => "COMPLETED",
            TaskState::Resolving => "RESOLVING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(TaskState::Pending),
            "RUNNING" => Some(TaskState::Running),
            "COMPLETED" => Some(TaskState::Completed),
            "RESOLVING" => Some(TaskState::Resolving),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to run, as supplied by whoever desired the task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub root_fs: String,
    pub action: serde_json::Value,
    #[serde(default)]
    pub memory_mb: i32,
    #[serde(default)]
    pub disk_mb: i32,
    #[serde(default)]
    pub log_guid: String,
    #[serde(default)]
    pub result_file: String,
    #[serde(default)]
    pub completion_callback_url: Option<String>,
    #[serde(default)]
    pub annotation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub guid: String,
    pub domain: String,
    pub definition: TaskDefinition,
    pub state: TaskState,
    pub cell_id: String,
    pub result: String,
    pub failed: bool,
    pub failure_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new_pending(
        guid: &str,
        domain: &str,
        definition: TaskDefinition,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            guid: guid.to_string(),
            domain: domain.to_string(),
            definition,
            state: TaskState::Pending,
            cell_id: String::new(),
            result: String::new(),
            failed: false,
            failure_reason: String::new(),
            created_at: now,
            updated_at: now,
            first_completed_at: None,
        }
    }

    pub fn validate_transition_to(&self, to: TaskState) -> Result<()> {
        let valid = match to {
            TaskState::Running => self.state == TaskState::Pending,
            TaskState::Completed => self.state == TaskState::Running,
            TaskState::Resolving => self.state == TaskState::Completed,
            TaskState::Pending => false,
        };
        if valid {
            Ok(())
        } else {
            Err(DbError::InvalidStateTransition {
                from: self.state,
                to,
            })
        }
    }

    /// Cancel and fail may also short-circuit a task that never started.
    pub fn validate_abort(&self) -> Result<()> {
        match self.state {
            TaskState::Pending | TaskState::Running => Ok(()),
            _ => Err(DbError::InvalidStateTransition {
                from: self.state,
                to: TaskState::Completed,
            }),
        }
    }

    pub(crate) fn complete(
        &mut self,
        failed: bool,
        failure_reason: &str,
        result: &str,
        now: DateTime<Utc>,
    ) {
        self.state = TaskState::Completed;
        self.cell_id.clear();
        self.failed = failed;
        self.failure_reason = failure_reason.to_string();
        self.result = result.to_string();
        self.updated_at = now;
        if self.first_completed_at.is_none() {
            self.first_completed_at = Some(now);
        }
    }
}

/// Work the auctioneer should (re-)place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStartRequest {
    pub guid: String,
    pub domain: String,
    pub definition: TaskDefinition,
}

impl From<&Task> for TaskStartRequest {
    fn from(task: &Task) -> Self {
        Self {
            guid: task.guid.clone(),
            domain: task.domain.clone(),
            definition: task.definition.clone(),
        }
    }
}

pub(crate) fn validate_task_guid(guid: &str) -> Result<()> {
    validate_identifier("task_guid", guid)
}

pub(crate) fn validate_failure_reason(reason: &str) -> Result<()> {
    if reason.len() > MAX_FAILURE_REASON_LENGTH {
        return Err(DbError::BadRequest(format!(
            "failure_reason exceeds {} bytes",
            MAX_FAILURE_REASON_LENGTH
        )));
    }
    Ok(())
}

//! Fire-and-forget metrics seam.
//!
//! Emission failures are logged by the caller and never propagated. The
//! default sink forwards to whatever recorder the `metrics` facade has
//! installed, and costs nothing when none is.

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// LRP Convergence Metrics
// ============================================================================

pub const CONVERGENCE_LRP_RUNS: &str = "ConvergenceLRPRuns";
pub const CONVERGENCE_LRP_DURATION: &str = "ConvergenceLRPDuration";
pub const LRPS_MISSING: &str = "LRPsMissing";
pub const LRPS_EXTRA: &str = "LRPsExtra";
pub const LRPS_UNCLAIMED: &str = "LRPsUnclaimed";
pub const LRPS_CLAIMED: &str = "LRPsClaimed";
pub const LRPS_RUNNING: &str = "LRPsRunning";
pub const CRASHED_ACTUAL_LRPS: &str = "CrashedActualLRPs";
pub const SUSPECT_RUNNING_ACTUAL_LRPS: &str = "SuspectRunningActualLRPs";
pub const SUSPECT_CLAIMED_ACTUAL_LRPS: &str = "SuspectClaimedActualLRPs";
pub const PRESENT_CELLS: &str = "PresentCells";

// ============================================================================
// Task Convergence Metrics
// ============================================================================

pub const CONVERGENCE_TASK_RUNS: &str = "ConvergenceTaskRuns";
pub const CONVERGENCE_TASK_DURATION: &str = "ConvergenceTaskDuration";
pub const CONVERGENCE_TASKS_KICKED: &str = "ConvergenceTasksKicked";
pub const CONVERGENCE_TASKS_PRUNED: &str = "ConvergenceTasksPruned";
pub const CONVERGENCE_TASKS_INVALID: &str = "ConvergenceTasksInvalid";
pub const TASKS_PENDING: &str = "TasksPending";
pub const TASKS_RUNNING: &str = "TasksRunning";
pub const TASKS_COMPLETED: &str = "TasksCompleted";
pub const TASKS_RESOLVING: &str = "TasksResolving";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    #[error("metrics sink unavailable: {0}")]
    Unavailable(String),
}

pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str, by: u64) -> Result<(), MetricsError>;

    fn send_duration(&self, name: &str, duration: Duration) -> Result<(), MetricsError>;

    fn send_gauge(&self, name: &str, value: i64) -> Result<(), MetricsError>;
}

/// Logs a failed emission instead of returning it.
pub(crate) fn emit(name: &str, outcome: Result<(), MetricsError>) {
    if let Err(err) = outcome {
        tracing::error!(metric = name, error = %err, "failed-sending-metric");
    }
}

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers every convergence metric description.
///
/// Call this once at startup, after installing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(CONVERGENCE_LRP_RUNS, "Total LRP convergence sweeps");
    describe_histogram!(CONVERGENCE_LRP_DURATION, "Duration of LRP convergence sweeps in seconds");
    describe_gauge!(LRPS_MISSING, "Desired LRP instances with no actual row");
    describe_gauge!(LRPS_EXTRA, "Actual LRP instances beyond the desired count");
    describe_gauge!(LRPS_UNCLAIMED, "Actual LRPs in the unclaimed state");
    describe_gauge!(LRPS_CLAIMED, "Actual LRPs in the claimed state");
    describe_gauge!(LRPS_RUNNING, "Actual LRPs in the running state");
    describe_gauge!(CRASHED_ACTUAL_LRPS, "Actual LRPs in the crashed state");
    describe_gauge!(SUSPECT_RUNNING_ACTUAL_LRPS, "Suspect actual LRPs that are running");
    describe_gauge!(SUSPECT_CLAIMED_ACTUAL_LRPS, "Suspect actual LRPs that are claimed");
    describe_gauge!(PRESENT_CELLS, "Cells present during the last sweep");

    describe_counter!(CONVERGENCE_TASK_RUNS, "Total task convergence sweeps");
    describe_histogram!(CONVERGENCE_TASK_DURATION, "Duration of task convergence sweeps in seconds");
    describe_counter!(CONVERGENCE_TASKS_KICKED, "Tasks re-delivered by convergence");
    describe_counter!(CONVERGENCE_TASKS_PRUNED, "Tasks deleted by convergence");
    describe_counter!(CONVERGENCE_TASKS_INVALID, "Corrupt task rows deleted by convergence");
    describe_gauge!(TASKS_PENDING, "Tasks in the pending state");
    describe_gauge!(TASKS_RUNNING, "Tasks in the running state");
    describe_gauge!(TASKS_COMPLETED, "Tasks in the completed state");
    describe_gauge!(TASKS_RESOLVING, "Tasks in the resolving state");
}

/// Forwards to the `metrics` facade. Durations are recorded in seconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeMetrics;

impl MetricsSink for FacadeMetrics {
    fn increment_counter(&self, name: &str, by: u64) -> Result<(), MetricsError> {
        counter!(name.to_owned()).increment(by);
        Ok(())
    }

    fn send_duration(&self, name: &str, duration: Duration) -> Result<(), MetricsError> {
        histogram!(name.to_owned()).record(duration.as_secs_f64());
        Ok(())
    }

    fn send_gauge(&self, name: &str, value: i64) -> Result<(), MetricsError> {
        gauge!(name.to_owned()).set(value as f64);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Recorded {
    counters: HashMap<String, u64>,
    durations: HashMap<String, Vec<Duration>>,
    gauges: HashMap<String, i64>,
}

/// Keeps every emitted value in memory.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    recorded: Mutex<Recorded>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.recorded
            .lock()
            .map(|r| r.counters.get(name).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.recorded
            .lock()
            .ok()
            .and_then(|r| r.gauges.get(name).copied())
    }

    pub fn durations(&self, name: &str) -> Vec<Duration> {
        self.recorded
            .lock()
            .map(|r| r.durations.get(name).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn record<F: FnOnce(&mut Recorded)>(&self, f: F) -> Result<(), MetricsError> {
        let mut recorded = self
            .recorded
            .lock()
            .map_err(|e| MetricsError::Unavailable(e.to_string()))?;
        f(&mut recorded);
        Ok(())
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment_counter(&self, name: &str, by: u64) -> Result<(), MetricsError> {
        self.record(|r| *r.counters.entry(name.to_string()).or_default() += by)
    }

    fn send_duration(&self, name: &str, duration: Duration) -> Result<(), MetricsError> {
        self.record(|r| {
            r.durations
                .entry(name.to_string())
                .or_default()
                .push(duration)
        })
    }

    fn send_gauge(&self, name: &str, value: i64) -> Result<(), MetricsError> {
        self.record(|r| {
            r.gauges.insert(name.to_string(), value);
        })
    }
}

// ============================================================================
// ConvergeDB Library
// ============================================================================
//
// State store and convergence engine for long-running process instances and
// one-shot tasks. Lifecycle operations lock the rows they touch; convergence
// sweeps classify drift for the scheduler to act on.
//
// ============================================================================

pub mod config;
pub mod convergence;
pub mod core;
pub mod facade;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use config::{
    Config, ConvergerConfig, LrpConvergenceConfig, StoreConfig, TaskConvergenceConfig,
};
pub use convergence::{
    CELL_DISAPPEARED_FAILURE_REASON, CellRegistry, ConvergenceListener, ConvergenceResult,
    Converger, ConvergerTask, EXPIRED_FAILURE_REASON, LrpConvergence, TaskConvergence,
    TaskConvergenceResult,
};
pub use core::{Clock, Codec, DbError, FakeClock, Format, GuidProvider, Result};
pub use facade::{
    ActualLrpDb, ActualLrpFilter, DesiredLrpDb, DomainDb, EvacuationDb, StateDb, TaskDb,
    TaskFilter,
};
pub use crate::metrics::{FacadeMetrics, MetricsSink, RecordingMetrics, register_metrics};

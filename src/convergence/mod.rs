pub mod converger;
pub mod lrp;
pub mod task;

pub use converger::{CellRegistry, ConvergenceListener, Converger, ConvergerTask};
pub use lrp::{ConvergenceInput, ConvergenceResult, LrpConvergence, classify};
pub use task::{
    CELL_DISAPPEARED_FAILURE_REASON, EXPIRED_FAILURE_REASON, TaskConvergence,
    TaskConvergenceMetrics, TaskConvergenceResult,
};

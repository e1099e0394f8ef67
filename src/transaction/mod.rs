// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Row-lock transactions over the in-memory tables: lock, read, stage,
// then commit atomically or roll back.
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod state;

pub use change::{Change, RowChange};
pub use manager::{TransactionManager, TransactionStats};
pub use state::{Transaction, TransactionId, TransactionState};

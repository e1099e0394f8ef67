pub mod locks;
pub mod memory;
pub mod rows;
pub mod table;

pub use locks::{LockKey, RowLockGuard, RowLockManager};
pub use memory::InMemoryStorage;
pub use rows::{ActualLrpRow, ActualLrpRowKey, DesiredLrpRow, DomainRow, Row, TaskRow};
pub use table::Table;

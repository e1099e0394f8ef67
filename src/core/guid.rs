use super::{DbError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

/// Allocates modification-tag epochs for newly created records.
pub trait GuidProvider: Send + Sync {
    fn next_guid(&self) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGuidProvider;

impl GuidProvider for UuidGuidProvider {
    fn next_guid(&self) -> Result<String> {
        Ok(Uuid::new_v4().to_string())
    }
}

/// Predictable guids (`<prefix>-1`, `<prefix>-2`, ...) with an injectable failure.
#[derive(Debug)]
pub struct SequentialGuidProvider {
    prefix: String,
    next: AtomicU64,
    failing: AtomicBool,
}

impl SequentialGuidProvider {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next: AtomicU64::new(1),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl GuidProvider for SequentialGuidProvider {
    fn next_guid(&self) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DbError::GuidGeneration("guid source unavailable".into()));
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}-{}", self.prefix, n))
    }
}

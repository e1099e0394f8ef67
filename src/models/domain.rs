use chrono::{DateTime, Utc};

/// A domain is "fresh" while the desired-state owner keeps renewing it.
/// Convergence refuses destructive actions on stale domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    /// `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Domain {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

//! Legal state-transition table for actual LRPs.
//!
//! Every lifecycle operation consults [`allows_transition`] under the row
//! lock before it writes anything.

use super::actual_lrp::{ActualLrpState, InstanceIdentity, StateKind};
use crate::core::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Claim,
    Start,
    Crash,
    /// Record a placement error on an unclaimed slot.
    Fail,
    Unclaim,
}

impl Transition {
    pub fn target(&self) -> StateKind {
        match self {
            Transition::Claim => StateKind::Claimed,
            Transition::Start => StateKind::Running,
            Transition::Crash => StateKind::Crashed,
            Transition::Fail | Transition::Unclaim => StateKind::Unclaimed,
        }
    }

    /// The error surfaced when the guard rejects this transition.
    pub fn rejection(&self) -> DbError {
        match self {
            Transition::Claim => DbError::ActualLrpCannotBeClaimed,
            Transition::Start => DbError::ActualLrpCannotBeStarted,
            Transition::Crash => DbError::ActualLrpCannotBeCrashed,
            Transition::Fail => DbError::ActualLrpCannotBeFailed,
            Transition::Unclaim => DbError::ActualLrpCannotBeUnclaimed,
        }
    }
}

pub fn allows_transition(
    current: &ActualLrpState,
    identity: &InstanceIdentity,
    transition: Transition,
) -> bool {
    use ActualLrpState::*;

    match (current, transition) {
        (Unclaimed { .. }, Transition::Claim | Transition::Start | Transition::Fail) => true,

        (Claimed { instance }, Transition::Claim | Transition::Start | Transition::Crash) => {
            instance == identity
        }
        (Running { instance, .. }, Transition::Start | Transition::Crash) => instance == identity,
        (Claimed { .. } | Running { .. }, Transition::Unclaim) => true,

        (Crashed, Transition::Claim | Transition::Start) => !identity.is_empty(),

        _ => false,
    }
}

/// Guard check that maps a rejection onto the operation's error.
pub fn check_transition(
    current: &ActualLrpState,
    identity: &InstanceIdentity,
    transition: Transition,
) -> Result<(), DbError> {
    if allows_transition(current, identity, transition) {
        Ok(())
    } else {
        Err(transition.rejection())
    }
}

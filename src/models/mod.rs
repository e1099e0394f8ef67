pub mod actual_lrp;
pub mod cell;
pub mod desired;
pub mod domain;
pub mod events;
pub mod group;
pub mod restart;
pub mod task;
pub mod transition;

pub use actual_lrp::{
    ActualLrp, ActualLrpKey, ActualLrpState, InstanceIdentity, ModificationTag, NetInfo,
    PortMapping, Presence, StateKind,
};
pub use cell::{CellPresence, CellSet};
pub use desired::{ActualLrpKeyWithSchedulingInfo, DesiredLrpSchedulingInfo, Resource, Routes};
pub use domain::Domain;
pub use events::Event;
pub use group::{ActualLrpGroup, resolve_groups};
pub use restart::RestartPolicy;
pub use task::{Task, TaskDefinition, TaskStartRequest, TaskState};
pub use transition::{Transition, allows_transition, check_transition};

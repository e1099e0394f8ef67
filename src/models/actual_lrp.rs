use crate::core::{DbError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound for identifiers accepted from callers (guids, cell ids, domains).
pub const MAX_IDENTIFIER_LENGTH: usize = 255;

pub(crate) fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(DbError::BadRequest(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(DbError::BadRequest(format!(
            "{} exceeds {} bytes",
            field, MAX_IDENTIFIER_LENGTH
        )));
    }
    Ok(())
}

/// Logical instance slot: one per `(process_guid, index)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActualLrpKey {
    pub process_guid: String,
    pub index: i32,
    pub domain: String,
}

impl ActualLrpKey {
    pub fn new(process_guid: &str, index: i32, domain: &str) -> Self {
        Self {
            process_guid: process_guid.to_string(),
            index,
            domain: domain.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier("process_guid", &self.process_guid)?;
        validate_identifier("domain", &self.domain)?;
        if self.index < 0 {
            return Err(DbError::BadRequest("index must not be negative".into()));
        }
        Ok(())
    }
}

impl fmt::Display for ActualLrpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.process_guid, self.index)
    }
}

/// Which physical execution owns a slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub instance_guid: String,
    pub cell_id: String,
}

impl InstanceIdentity {
    pub fn new(instance_guid: &str, cell_id: &str) -> Self {
        Self {
            instance_guid: instance_guid.to_string(),
            cell_id: cell_id.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instance_guid.is_empty() && self.cell_id.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier("instance_guid", &self.instance_guid)?;
        validate_identifier("cell_id", &self.cell_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u32,
    pub host_port: u32,
    #[serde(default)]
    pub container_tls_proxy_port: u32,
    #[serde(default)]
    pub host_tls_proxy_port: u32,
}

impl PortMapping {
    pub fn new(container_port: u32, host_port: u32) -> Self {
        Self {
            container_port,
            host_port,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetInfo {
    pub address: String,
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub instance_address: String,
}

impl NetInfo {
    pub fn new(address: &str, ports: Vec<PortMapping>) -> Self {
        Self {
            address: address.to_string(),
            ports,
            instance_address: String::new(),
        }
    }
}

/// Epoch + counter pair.
///
/// The epoch is fixed when a record is created; every mutating write bumps
/// `index`. Readers use it to detect updates they raced against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModificationTag {
    pub epoch: String,
    pub index: u32,
}

impl ModificationTag {
    pub fn new(epoch: String) -> Self {
        Self { epoch, index: 0 }
    }

    pub fn increment(&mut self) {
        self.index += 1;
    }

    /// True if `other` is a later write of the same record.
    pub fn succeeded_by(&self, other: &ModificationTag) -> bool {
        self.epoch.is_empty()
            || other.epoch.is_empty()
            || self.epoch != other.epoch
            || self.index < other.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Presence {
    Ordinary,
    Evacuating,
    Suspect,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Ordinary => write!(f, "ORDINARY"),
            Presence::Evacuating => write!(f, "EVACUATING"),
            Presence::Suspect => write!(f, "SUSPECT"),
        }
    }
}

/// Field-free view of [`ActualLrpState`], used as the stored state column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    Unclaimed,
    Claimed,
    Running,
    Crashed,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Unclaimed => "UNCLAIMED",
            StateKind::Claimed => "CLAIMED",
            StateKind::Running => "RUNNING",
            StateKind::Crashed => "CRASHED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "UNCLAIMED" => Some(StateKind::Unclaimed),
            "CLAIMED" => Some(StateKind::Claimed),
            "RUNNING" => Some(StateKind::Running),
            "CRASHED" => Some(StateKind::Crashed),
            _ => None,
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state with the data each state is allowed to carry.
///
/// An unclaimed slot never has an owner or an address, and only an unclaimed
/// slot can carry a placement error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActualLrpState {
    Unclaimed { placement_error: Option<String> },
    Claimed { instance: InstanceIdentity },
    Running { instance: InstanceIdentity, net_info: NetInfo },
    Crashed,
}

impl ActualLrpState {
    pub fn unclaimed() -> Self {
        ActualLrpState::Unclaimed {
            placement_error: None,
        }
    }

    pub fn kind(&self) -> StateKind {
        match self {
            ActualLrpState::Unclaimed { .. } => StateKind::Unclaimed,
            ActualLrpState::Claimed { .. } => StateKind::Claimed,
            ActualLrpState::Running { .. } => StateKind::Running,
            ActualLrpState::Crashed => StateKind::Crashed,
        }
    }

    pub fn identity(&self) -> Option<&InstanceIdentity> {
        match self {
            ActualLrpState::Claimed { instance } | ActualLrpState::Running { instance, .. } => {
                Some(instance)
            }
            _ => None,
        }
    }

    pub fn net_info(&self) -> Option<&NetInfo> {
        match self {
            ActualLrpState::Running { net_info, .. } => Some(net_info),
            _ => None,
        }
    }

    pub fn placement_error(&self) -> Option<&str> {
        match self {
            ActualLrpState::Unclaimed { placement_error } => placement_error.as_deref(),
            _ => None,
        }
    }
}

/// One physical presence-row of an instance slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualLrp {
    pub key: ActualLrpKey,
    pub state: ActualLrpState,
    pub presence: Presence,
    pub since: DateTime<Utc>,
    pub crash_count: u32,
    pub crash_reason: String,
    pub modification_tag: ModificationTag,
}

impl ActualLrp {
    pub fn new_unclaimed(key: ActualLrpKey, epoch: String, now: DateTime<Utc>) -> Self {
        Self {
            key,
            state: ActualLrpState::unclaimed(),
            presence: Presence::Ordinary,
            since: now,
            crash_count: 0,
            crash_reason: String::new(),
            modification_tag: ModificationTag::new(epoch),
        }
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    pub fn identity(&self) -> Option<&InstanceIdentity> {
        self.state.identity()
    }

    /// Owning cell, empty when the slot has no owner.
    pub fn cell_id(&self) -> &str {
        self.identity().map(|i| i.cell_id.as_str()).unwrap_or("")
    }

    pub fn instance_guid(&self) -> &str {
        self.identity()
            .map(|i| i.instance_guid.as_str())
            .unwrap_or("")
    }

    pub fn is_owned_by(&self, identity: &InstanceIdentity) -> bool {
        self.identity() == Some(identity)
    }
}

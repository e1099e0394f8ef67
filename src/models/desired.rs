use super::actual_lrp::{ActualLrpKey, ModificationTag, validate_identifier};
use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Route payloads keyed by router name, opaque to this store.
pub type Routes = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub memory_mb: i32,
    pub disk_mb: i32,
    #[serde(default)]
    pub max_pids: i32,
}

/// What the operator wants running for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredLrpSchedulingInfo {
    pub process_guid: String,
    pub domain: String,
    pub instances: i32,
    pub resource: Resource,
    pub routes: Routes,
    pub annotation: String,
    pub modification_tag: ModificationTag,
}

impl DesiredLrpSchedulingInfo {
    pub fn new(process_guid: &str, domain: &str, instances: i32) -> Self {
        Self {
            process_guid: process_guid.to_string(),
            domain: domain.to_string(),
            instances,
            resource: Resource::default(),
            routes: Routes::new(),
            annotation: String::new(),
            modification_tag: ModificationTag::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier("process_guid", &self.process_guid)?;
        validate_identifier("domain", &self.domain)?;
        if self.instances < 0 {
            return Err(DbError::BadRequest("instances must not be negative".into()));
        }
        Ok(())
    }

    pub fn actual_lrp_key(&self, index: i32) -> ActualLrpKey {
        ActualLrpKey::new(&self.process_guid, index, &self.domain)
    }
}

/// A slot key bundled with what the scheduler needs to place it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualLrpKeyWithSchedulingInfo {
    pub key: ActualLrpKey,
    pub scheduling_info: DesiredLrpSchedulingInfo,
}

impl ActualLrpKeyWithSchedulingInfo {
    pub fn new(info: &DesiredLrpSchedulingInfo, index: i32) -> Self {
        Self {
            key: info.actual_lrp_key(index),
            scheduling_info: info.clone(),
        }
    }
}

// ============================================================================
// Store Facade
// ============================================================================
//
// `StateDb` is the public handle. Each operation family is a trait at the
// seam callers mock in their own tests; `StateDb` implements them all on the
// row-lock transactions underneath.
//
// ============================================================================

pub mod actual_lrp_db;
pub mod database;
pub mod desired_db;
pub mod domain_db;
pub mod evacuation_db;
pub mod filters;
pub(crate) mod records;
pub mod task_db;

pub use actual_lrp_db::truncate_crash_reason;
pub use database::StateDb;
pub use filters::{ActualLrpFilter, TaskFilter};

use crate::core::Result;
use crate::models::{
    ActualLrp, ActualLrpGroup, ActualLrpKey, DesiredLrpSchedulingInfo, InstanceIdentity, NetInfo,
    Presence, Task, TaskDefinition,
};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait ActualLrpDb: Send + Sync {
    async fn actual_lrps(&self, filter: &ActualLrpFilter) -> Result<Vec<ActualLrp>>;

    async fn actual_lrp_groups(&self, filter: &ActualLrpFilter) -> Result<Vec<ActualLrpGroup>>;

    /// `ResourceNotFound` when no presence-row exists for the slot.
    async fn actual_lrp_group(&self, process_guid: &str, index: i32) -> Result<ActualLrpGroup>;

    /// Surfaces `Deserialize` instead of healing a corrupt row.
    async fn actual_lrp_by_key(
        &self,
        process_guid: &str,
        index: i32,
        presence: Presence,
    ) -> Result<ActualLrp>;

    async fn create_unclaimed_actual_lrp(&self, key: &ActualLrpKey) -> Result<ActualLrp>;

    async fn claim_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
    ) -> Result<(ActualLrp, ActualLrp)>;

    /// Creates the row in `Running` when the slot has none, so `before` is
    /// optional.
    async fn start_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
        net_info: &NetInfo,
    ) -> Result<(Option<ActualLrp>, ActualLrp)>;

    /// Returns whether the instance was put straight back to `Unclaimed`.
    async fn crash_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
        reason: &str,
    ) -> Result<(ActualLrp, ActualLrp, bool)>;

    async fn fail_actual_lrp(
        &self,
        key: &ActualLrpKey,
        placement_error: &str,
    ) -> Result<(ActualLrp, ActualLrp)>;

    async fn unclaim_actual_lrp(&self, key: &ActualLrpKey) -> Result<(ActualLrp, ActualLrp)>;

    async fn remove_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        identity: Option<&InstanceIdentity>,
    ) -> Result<ActualLrp>;

    async fn change_actual_lrp_presence(
        &self,
        key: &ActualLrpKey,
        from: Presence,
        to: Presence,
    ) -> Result<(ActualLrp, ActualLrp)>;
}

#[async_trait]
pub trait EvacuationDb: Send + Sync {
    /// `ResourceExists` when an identical shadow is already there.
    async fn evacuate_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
        net_info: &NetInfo,
    ) -> Result<ActualLrp>;

    /// `Ok(None)` when there is no shadow to remove.
    async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
    ) -> Result<Option<ActualLrp>>;

    async fn remove_suspect_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
    ) -> Result<Option<ActualLrp>>;
}

#[async_trait]
pub trait TaskDb: Send + Sync {
    async fn tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    async fn task_by_guid(&self, guid: &str) -> Result<Task>;

    async fn desire_task(&self, definition: &TaskDefinition, guid: &str, domain: &str)
    -> Result<Task>;

    /// `started` is false when the task was already running on `cell_id`.
    async fn start_task(&self, guid: &str, cell_id: &str) -> Result<(Task, Task, bool)>;

    /// Also returns the cell the task was running on, if any.
    async fn cancel_task(&self, guid: &str) -> Result<(Task, Task, String)>;

    async fn fail_task(&self, guid: &str, failure_reason: &str) -> Result<(Task, Task)>;

    async fn complete_task(
        &self,
        guid: &str,
        cell_id: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<(Task, Task)>;

    async fn resolving_task(&self, guid: &str) -> Result<(Task, Task)>;

    async fn delete_task(&self, guid: &str) -> Result<Task>;
}

#[async_trait]
pub trait DesiredLrpDb: Send + Sync {
    async fn desire_lrp(&self, info: &DesiredLrpSchedulingInfo) -> Result<DesiredLrpSchedulingInfo>;

    async fn update_desired_instances(
        &self,
        process_guid: &str,
        instances: i32,
    ) -> Result<(DesiredLrpSchedulingInfo, DesiredLrpSchedulingInfo)>;

    async fn remove_desired_lrp(&self, process_guid: &str) -> Result<()>;

    async fn desired_lrp_scheduling_infos(&self) -> Result<Vec<DesiredLrpSchedulingInfo>>;
}

#[async_trait]
pub trait DomainDb: Send + Sync {
    /// A zero `ttl` never expires.
    async fn upsert_domain(&self, name: &str, ttl: Duration) -> Result<()>;

    async fn fresh_domains(&self) -> Result<Vec<String>>;
}

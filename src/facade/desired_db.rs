use super::{DesiredLrpDb, StateDb};
use crate::core::{DbError, Result};
use crate::models::{DesiredLrpSchedulingInfo, ModificationTag};
use crate::storage::DesiredLrpRow;
use async_trait::async_trait;
use tracing::{Instrument, Level, event, info_span};

#[async_trait]
impl DesiredLrpDb for StateDb {
    async fn desire_lrp(&self, info: &DesiredLrpSchedulingInfo) -> Result<DesiredLrpSchedulingInfo> {
        let span = info_span!("desire-lrp", process_guid = %info.process_guid);
        async move {
            info.validate()?;
            let mut desired = info.clone();
            desired.modification_tag = ModificationTag::new(self.next_guid()?);

            let mut txn = self.begin();
            txn.insert(self.encode(&desired)?).await?;
            txn.commit().await?;
            event!(Level::DEBUG, instances = desired.instances, "desired");
            Ok(desired)
        }
        .instrument(span)
        .await
    }

    async fn update_desired_instances(
        &self,
        process_guid: &str,
        instances: i32,
    ) -> Result<(DesiredLrpSchedulingInfo, DesiredLrpSchedulingInfo)> {
        let span = info_span!("update-desired-instances", process_guid = %process_guid, instances);
        async move {
            if instances < 0 {
                return Err(DbError::BadRequest("instances must not be negative".into()));
            }
            let mut txn = self.begin();
            let before = self
                .lookup_for_update::<DesiredLrpSchedulingInfo>(&mut txn, &process_guid.to_string())
                .await?
                .ok_or(DbError::ResourceNotFound)?;

            let mut after = before.clone();
            after.instances = instances;
            after.modification_tag.increment();
            txn.update(self.encode(&after)?).await?;
            txn.commit().await?;
            Ok((before, after))
        }
        .instrument(span)
        .await
    }

    async fn remove_desired_lrp(&self, process_guid: &str) -> Result<()> {
        let span = info_span!("remove-desired-lrp", process_guid = %process_guid);
        async move {
            let mut txn = self.begin();
            if !txn.delete::<DesiredLrpRow>(&process_guid.to_string()).await? {
                return Err(DbError::ResourceNotFound);
            }
            txn.commit().await?;
            event!(Level::DEBUG, "removed");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn desired_lrp_scheduling_infos(&self) -> Result<Vec<DesiredLrpSchedulingInfo>> {
        let scan = self
            .scan_records::<DesiredLrpSchedulingInfo, _>(|_: &DesiredLrpRow| true)
            .await;
        Ok(scan.records)
    }
}

use super::actual_lrp_db::new_presence_row;
use super::{EvacuationDb, StateDb};
use crate::core::{DbError, Result};
use crate::models::{ActualLrp, ActualLrpKey, ActualLrpState, InstanceIdentity, NetInfo, Presence};
use crate::storage::{ActualLrpRow, ActualLrpRowKey};
use async_trait::async_trait;
use tracing::{Instrument, Level, event, info_span};

impl StateDb {
    /// Deletes the `presence` row of a slot if `identity` still owns it.
    async fn remove_owned_presence(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
        presence: Presence,
    ) -> Result<Option<ActualLrp>> {
        let mut txn = self.begin();
        let Some(before) = self.lookup_lrp_for_update(&mut txn, key, presence).await? else {
            event!(Level::DEBUG, "nothing-to-remove");
            return Ok(None);
        };
        if !before.is_owned_by(identity) {
            event!(
                Level::WARN,
                stored_instance_guid = %before.instance_guid(),
                stored_cell_id = %before.cell_id(),
                "identity-mismatch"
            );
            return Err(DbError::ActualLrpCannotBeRemoved);
        }

        let row_key = ActualLrpRowKey::new(&key.process_guid, key.index, presence);
        txn.delete::<ActualLrpRow>(&row_key).await?;
        txn.commit().await?;
        event!(Level::DEBUG, "removed");
        Ok(Some(before))
    }
}

#[async_trait]
impl EvacuationDb for StateDb {
    async fn evacuate_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
        net_info: &NetInfo,
    ) -> Result<ActualLrp> {
        let span = info_span!(
            "evacuate-actual-lrp",
            process_guid = %key.process_guid,
            index = key.index,
            instance_guid = %identity.instance_guid,
            cell_id = %identity.cell_id
        );
        async move {
            key.validate()?;
            identity.validate()?;
            let running = ActualLrpState::Running {
                instance: identity.clone(),
                net_info: net_info.clone(),
            };

            let mut txn = self.begin();
            let existing = self
                .lookup_lrp_for_update(&mut txn, key, Presence::Evacuating)
                .await?;

            let after = match existing {
                Some(shadow) if shadow.state == running && shadow.key == *key => {
                    event!(Level::DEBUG, "already-evacuating");
                    return Err(DbError::ResourceExists);
                }
                Some(shadow) => {
                    let mut after = shadow;
                    after.key = key.clone();
                    after.state = running;
                    after.since = self.now();
                    after.modification_tag.increment();
                    txn.update(self.encode(&after)?).await?;
                    after
                }
                None => {
                    let after = new_presence_row(
                        key,
                        Presence::Evacuating,
                        running,
                        self.next_guid()?,
                        self.now(),
                    );
                    txn.insert(self.encode(&after)?).await?;
                    after
                }
            };
            txn.commit().await?;
            event!(Level::DEBUG, "evacuating");
            Ok(after)
        }
        .instrument(span)
        .await
    }

    async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
    ) -> Result<Option<ActualLrp>> {
        let span = info_span!(
            "remove-evacuating-actual-lrp",
            process_guid = %key.process_guid,
            index = key.index,
            instance_guid = %identity.instance_guid
        );
        self.remove_owned_presence(key, identity, Presence::Evacuating)
            .instrument(span)
            .await
    }

    async fn remove_suspect_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
    ) -> Result<Option<ActualLrp>> {
        let span = info_span!(
            "remove-suspect-actual-lrp",
            process_guid = %key.process_guid,
            index = key.index,
            instance_guid = %identity.instance_guid
        );
        self.remove_owned_presence(key, identity, Presence::Suspect)
            .instrument(span)
            .await
    }
}

use super::{ActualLrpDb, ActualLrpFilter, StateDb};
use crate::core::{DbError, Result};
use crate::models::{
    ActualLrp, ActualLrpGroup, ActualLrpKey, ActualLrpState, InstanceIdentity, ModificationTag,
    NetInfo, Presence, StateKind, Transition, allows_transition, resolve_groups,
};
use crate::storage::{ActualLrpRow, ActualLrpRowKey};
use crate::transaction::Transaction;
use async_trait::async_trait;
use tracing::{Instrument, Level, event, info_span};

pub const MAX_CRASH_REASON_LENGTH: usize = 1024;
const TRUNCATION_MARKER: &str = "(truncated)";

/// Cuts `reason` to at most [`MAX_CRASH_REASON_LENGTH`] bytes, ending in a
/// truncation marker when anything was dropped.
pub fn truncate_crash_reason(reason: &str) -> String {
    if reason.len() <= MAX_CRASH_REASON_LENGTH {
        return reason.to_string();
    }
    let mut cut = MAX_CRASH_REASON_LENGTH - TRUNCATION_MARKER.len();
    while !reason.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &reason[..cut], TRUNCATION_MARKER)
}

impl StateDb {
    /// Writes `after` unless it is identical to `before`. Otherwise stamps
    /// `since` and bumps the modification tag before committing.
    async fn commit_transition(
        &self,
        mut txn: Transaction,
        before: ActualLrp,
        mut after: ActualLrp,
    ) -> Result<(ActualLrp, ActualLrp)> {
        if after == before {
            event!(Level::DEBUG, "no-op-transition");
            return Ok((before, after));
        }
        after.since = self.now();
        after.modification_tag.increment();
        let row = self.encode(&after)?;
        txn.update(row).await?;
        txn.commit().await?;
        Ok((before, after))
    }

    /// Locks the ordinary row and checks the guard.
    async fn guarded_ordinary(
        &self,
        txn: &mut Transaction,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
        transition: Transition,
    ) -> Result<ActualLrp> {
        let before = self
            .lookup_lrp_for_update(txn, key, Presence::Ordinary)
            .await?
            .ok_or(DbError::ResourceNotFound)?;
        if !allows_transition(&before.state, identity, transition) {
            event!(
                Level::WARN,
                state = %before.kind(),
                target = %transition.target(),
                "transition-rejected"
            );
            return Err(transition.rejection());
        }
        Ok(before)
    }
}

#[async_trait]
impl ActualLrpDb for StateDb {
    async fn actual_lrps(&self, filter: &ActualLrpFilter) -> Result<Vec<ActualLrp>> {
        let filter = filter.clone();
        let scan = self
            .scan_records::<ActualLrp, _>(move |row: &ActualLrpRow| filter.matches(row))
            .await;
        Ok(scan.records)
    }

    async fn actual_lrp_groups(&self, filter: &ActualLrpFilter) -> Result<Vec<ActualLrpGroup>> {
        Ok(resolve_groups(self.actual_lrps(filter).await?))
    }

    async fn actual_lrp_group(&self, process_guid: &str, index: i32) -> Result<ActualLrpGroup> {
        let filter = ActualLrpFilter::new().process_guid(process_guid).index(index);
        self.actual_lrp_groups(&filter)
            .await?
            .into_iter()
            .next()
            .ok_or(DbError::ResourceNotFound)
    }

    async fn actual_lrp_by_key(
        &self,
        process_guid: &str,
        index: i32,
        presence: Presence,
    ) -> Result<ActualLrp> {
        let key = ActualLrpRowKey::new(process_guid, index, presence);
        self.lookup::<ActualLrp>(&key).await.into_result()
    }

    async fn create_unclaimed_actual_lrp(&self, key: &ActualLrpKey) -> Result<ActualLrp> {
        let span = info_span!(
            "create-unclaimed-actual-lrp",
            process_guid = %key.process_guid,
            index = key.index
        );
        async move {
            key.validate()?;
            let epoch = self.next_guid()?;
            let lrp = ActualLrp::new_unclaimed(key.clone(), epoch, self.now());

            let mut txn = self.begin();
            txn.insert(self.encode(&lrp)?).await?;
            txn.commit().await?;
            event!(Level::DEBUG, "created");
            Ok(lrp)
        }
        .instrument(span)
        .await
    }

    async fn claim_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
    ) -> Result<(ActualLrp, ActualLrp)> {
        let span = info_span!(
            "claim-actual-lrp",
            process_guid = %key.process_guid,
            index = key.index,
            instance_guid = %identity.instance_guid,
            cell_id = %identity.cell_id
        );
        async move {
            identity.validate()?;
            let mut txn = self.begin();
            let before = self
                .guarded_ordinary(&mut txn, key, identity, Transition::Claim)
                .await?;

            let mut after = before.clone();
            after.state = ActualLrpState::Claimed {
                instance: identity.clone(),
            };
            self.commit_transition(txn, before, after).await
        }
        .instrument(span)
        .await
    }

    async fn start_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
        net_info: &NetInfo,
    ) -> Result<(Option<ActualLrp>, ActualLrp)> {
        let span = info_span!(
            "start-actual-lrp",
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
                .lookup_lrp_for_update(&mut txn, key, Presence::Ordinary)
                .await?;

            let Some(before) = existing else {
                let mut lrp = ActualLrp::new_unclaimed(key.clone(), self.next_guid()?, self.now());
                lrp.state = running;
                txn.insert(self.encode(&lrp)?).await?;
                txn.commit().await?;
                event!(Level::DEBUG, "created-running");
                return Ok((None, lrp));
            };

            if !allows_transition(&before.state, identity, Transition::Start) {
                event!(Level::WARN, state = %before.kind(), "transition-rejected");
                return Err(DbError::ActualLrpCannotBeStarted);
            }
            let mut after = before.clone();
            after.state = running;
            let (before, after) = self.commit_transition(txn, before, after).await?;
            Ok((Some(before), after))
        }
        .instrument(span)
        .await
    }

    async fn crash_actual_lrp(
        &self,
        key: &ActualLrpKey,
        identity: &InstanceIdentity,
        reason: &str,
    ) -> Result<(ActualLrp, ActualLrp, bool)> {
        let span = info_span!(
            "crash-actual-lrp",
            process_guid = %key.process_guid,
            index = key.index,
            instance_guid = %identity.instance_guid
        );
        async move {
            let mut txn = self.begin();
            let before = self
                .guarded_ordinary(&mut txn, key, identity, Transition::Crash)
                .await?;

            let now = self.now();
            let policy = &self.restart_policy;
            let crash_count = policy.next_crash_count(
                now,
                before.since,
                before.crash_count,
                before.kind() == StateKind::Running,
            );
            let restart_immediately = policy.should_restart_immediately(crash_count);

            let mut after = before.clone();
            after.crash_count = crash_count;
            after.crash_reason = truncate_crash_reason(reason);
            after.state = if restart_immediately {
                ActualLrpState::unclaimed()
            } else {
                ActualLrpState::Crashed
            };

            let (before, after) = self.commit_transition(txn, before, after).await?;
            event!(
                Level::INFO,
                crash_count = after.crash_count,
                restart_immediately,
                "crashed"
            );
            Ok((before, after, restart_immediately))
        }
        .instrument(span)
        .await
    }

    async fn fail_actual_lrp(
        &self,
        key: &ActualLrpKey,
        placement_error: &str,
    ) -> Result<(ActualLrp, ActualLrp)> {
        let span = info_span!(
            "fail-actual-lrp",
            process_guid = %key.process_guid,
            index = key.index
        );
        async move {
            if placement_error.is_empty() {
                return Err(DbError::BadRequest("placement_error must not be empty".into()));
            }
            let mut txn = self.begin();
            let before = self
                .guarded_ordinary(&mut txn, key, &InstanceIdentity::default(), Transition::Fail)
                .await?;

            let mut after = before.clone();
            after.state = ActualLrpState::Unclaimed {
                placement_error: Some(placement_error.to_string()),
            };
            self.commit_transition(txn, before, after).await
        }
        .instrument(span)
        .await
    }

    async fn unclaim_actual_lrp(&self, key: &ActualLrpKey) -> Result<(ActualLrp, ActualLrp)> {
        let span = info_span!(
            "unclaim-actual-lrp",
            process_guid = %key.process_guid,
            index = key.index
        );
        async move {
            let mut txn = self.begin();
            let before = self
                .guarded_ordinary(&mut txn, key, &InstanceIdentity::default(), Transition::Unclaim)
                .await?;

            let mut after = before.clone();
            after.state = ActualLrpState::unclaimed();
            self.commit_transition(txn, before, after).await
        }
        .instrument(span)
        .await
    }

    async fn remove_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        identity: Option<&InstanceIdentity>,
    ) -> Result<ActualLrp> {
        let span = info_span!("remove-actual-lrp", process_guid = %process_guid, index);
        async move {
            let row_key = ActualLrpRowKey::new(process_guid, index, Presence::Ordinary);
            let mut txn = self.begin();
            let before = self
                .lookup_for_update::<ActualLrp>(&mut txn, &row_key)
                .await?
                .ok_or(DbError::ResourceNotFound)?;

            if let Some(identity) = identity {
                if !before.is_owned_by(identity) {
                    event!(Level::WARN, cell_id = %before.cell_id(), "identity-mismatch");
                    return Err(DbError::ActualLrpCannotBeRemoved);
                }
            }

            txn.delete::<ActualLrpRow>(&row_key).await?;
            txn.commit().await?;
            event!(Level::DEBUG, "removed");
            Ok(before)
        }
        .instrument(span)
        .await
    }

    async fn change_actual_lrp_presence(
        &self,
        key: &ActualLrpKey,
        from: Presence,
        to: Presence,
    ) -> Result<(ActualLrp, ActualLrp)> {
        let span = info_span!(
            "change-actual-lrp-presence",
            process_guid = %key.process_guid,
            index = key.index,
            from = %from,
            to = %to
        );
        async move {
            let from_key = ActualLrpRowKey::new(&key.process_guid, key.index, from);
            let to_key = ActualLrpRowKey::new(&key.process_guid, key.index, to);

            let mut txn = self.begin();
            txn.lock_rows::<ActualLrpRow, _>([from_key.clone(), to_key.clone()])
                .await?;

            let before = self
                .lookup_for_update::<ActualLrp>(&mut txn, &from_key)
                .await?
                .ok_or(DbError::ResourceNotFound)?;
            if txn.get::<ActualLrpRow>(&to_key).await?.is_some() {
                return Err(DbError::ResourceExists);
            }

            let mut after = before.clone();
            after.presence = to;
            after.modification_tag.increment();

            txn.delete::<ActualLrpRow>(&from_key).await?;
            txn.insert(self.encode(&after)?).await?;
            txn.commit().await?;
            Ok((before, after))
        }
        .instrument(span)
        .await
    }
}

/// New shadow rows get a fresh tag and the current time.
pub(crate) fn new_presence_row(
    key: &ActualLrpKey,
    presence: Presence,
    state: ActualLrpState,
    epoch: String,
    now: chrono::DateTime<chrono::Utc>,
) -> ActualLrp {
    ActualLrp {
        key: key.clone(),
        state,
        presence,
        since: now,
        crash_count: 0,
        crash_reason: String::new(),
        modification_tag: ModificationTag::new(epoch),
    }
}

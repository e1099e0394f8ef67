//! LRP convergence.
//!
//! A sweep compares actual rows against the desired scheduling infos and
//! classifies what the scheduler should do next. Apart from pruning expired
//! domains and stale evacuating shadows it writes nothing: callers act on the
//! result through the regular lifecycle operations.

use crate::config::LrpConvergenceConfig;
use crate::core::clock::elapsed_between;
use crate::core::Result;
use crate::facade::{DesiredLrpDb, DomainDb, StateDb};
use crate::metrics::{self, emit};
use crate::models::{
    ActualLrp, ActualLrpKey, ActualLrpKeyWithSchedulingInfo, CellSet, DesiredLrpSchedulingInfo,
    Event, Presence, RestartPolicy, StateKind,
};
use crate::storage::{ActualLrpRow, ActualLrpRowKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{Instrument, Level, event, info_span};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergenceResult {
    /// Indices below the desired count with no row at all.
    pub missing_lrp_keys: Vec<ActualLrpKeyWithSchedulingInfo>,
    /// Stale unclaimed rows and crashed rows due for a restart.
    pub unstarted_lrp_keys: Vec<ActualLrpKeyWithSchedulingInfo>,
    /// Ordinary rows placed on a cell that is no longer registered.
    pub keys_with_missing_cells: Vec<ActualLrpKeyWithSchedulingInfo>,
    pub keys_to_retire: Vec<ActualLrpKey>,
    pub suspect_keys_to_retire: Vec<ActualLrpKey>,
    /// Suspect rows whose cell has come back.
    pub suspect_keys_with_existing_cells: Vec<ActualLrpKey>,
    pub suspect_running_keys: Vec<ActualLrpKey>,
    pub suspect_claimed_keys: Vec<ActualLrpKey>,
    pub missing_cell_ids: Vec<String>,
    /// Removal events for pruned evacuating rows.
    pub events: Vec<Event>,
}

impl ConvergenceResult {
    pub fn merge(mut self, other: ConvergenceResult) -> Self {
        self.missing_lrp_keys.extend(other.missing_lrp_keys);
        self.unstarted_lrp_keys.extend(other.unstarted_lrp_keys);
        self.keys_with_missing_cells
            .extend(other.keys_with_missing_cells);
        self.keys_to_retire.extend(other.keys_to_retire);
        self.suspect_keys_to_retire
            .extend(other.suspect_keys_to_retire);
        self.suspect_keys_with_existing_cells
            .extend(other.suspect_keys_with_existing_cells);
        self.suspect_running_keys.extend(other.suspect_running_keys);
        self.suspect_claimed_keys.extend(other.suspect_claimed_keys);
        self.missing_cell_ids.extend(other.missing_cell_ids);
        self.events.extend(other.events);
        self
    }

    /// Sorts every key list and drops duplicates a slot picked up from more
    /// than one check.
    pub fn finalize(mut self) -> Self {
        for keys in [
            &mut self.missing_lrp_keys,
            &mut self.unstarted_lrp_keys,
            &mut self.keys_with_missing_cells,
        ] {
            keys.sort_by(|a, b| a.key.cmp(&b.key));
            keys.dedup_by(|a, b| a.key == b.key);
        }
        for keys in [
            &mut self.keys_to_retire,
            &mut self.suspect_keys_to_retire,
            &mut self.suspect_keys_with_existing_cells,
            &mut self.suspect_running_keys,
            &mut self.suspect_claimed_keys,
        ] {
            keys.sort();
            keys.dedup();
        }
        self.missing_cell_ids.sort();
        self.missing_cell_ids.dedup();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.missing_lrp_keys.is_empty()
            && self.unstarted_lrp_keys.is_empty()
            && self.keys_with_missing_cells.is_empty()
            && self.keys_to_retire.is_empty()
            && self.suspect_keys_to_retire.is_empty()
            && self.suspect_keys_with_existing_cells.is_empty()
            && self.suspect_running_keys.is_empty()
            && self.suspect_claimed_keys.is_empty()
            && self.missing_cell_ids.is_empty()
            && self.events.is_empty()
    }
}

/// Snapshot a sweep classifies. Every check below is a pure function of it.
pub struct ConvergenceInput<'a> {
    pub lrps: Vec<ActualLrp>,
    pub desired: BTreeMap<String, DesiredLrpSchedulingInfo>,
    pub fresh_domains: BTreeSet<String>,
    pub cells: &'a CellSet,
    pub now: DateTime<Utc>,
    pub config: &'a LrpConvergenceConfig,
    pub restart_policy: &'a RestartPolicy,
}

impl ConvergenceInput<'_> {
    fn with_desired(&self, lrp: &ActualLrp) -> Option<ActualLrpKeyWithSchedulingInfo> {
        self.desired
            .get(&lrp.key.process_guid)
            .map(|info| ActualLrpKeyWithSchedulingInfo::new(info, lrp.key.index))
    }

    fn ordinaries(&self) -> impl Iterator<Item = &ActualLrp> {
        self.lrps
            .iter()
            .filter(|lrp| lrp.presence == Presence::Ordinary)
    }

    fn suspects(&self) -> impl Iterator<Item = &ActualLrp> {
        self.lrps
            .iter()
            .filter(|lrp| lrp.presence == Presence::Suspect)
    }
}

fn slot(lrp: &ActualLrp) -> (String, i32) {
    (lrp.key.process_guid.clone(), lrp.key.index)
}

pub fn stale_unclaimed(input: &ConvergenceInput<'_>) -> ConvergenceResult {
    let threshold = input.config.stale_unclaimed();
    let unstarted_lrp_keys = input
        .ordinaries()
        .filter(|lrp| lrp.kind() == StateKind::Unclaimed)
        .filter(|lrp| elapsed_between(lrp.since, input.now) > threshold)
        .filter_map(|lrp| input.with_desired(lrp))
        .inspect(|key| {
            event!(
                Level::INFO,
                reason = "stale-unclaimed-lrp",
                process_guid = %key.key.process_guid,
                index = key.key.index,
                "creating-start-request"
            );
        })
        .collect();
    ConvergenceResult {
        unstarted_lrp_keys,
        ..Default::default()
    }
}

pub fn crashed_restartable(input: &ConvergenceInput<'_>) -> ConvergenceResult {
    let unstarted_lrp_keys = input
        .ordinaries()
        .filter(|lrp| lrp.should_restart_crash(input.now, input.restart_policy))
        .filter_map(|lrp| input.with_desired(lrp))
        .inspect(|key| {
            event!(
                Level::INFO,
                reason = "crashed-instance",
                process_guid = %key.key.process_guid,
                index = key.key.index,
                "creating-start-request"
            );
        })
        .collect();
    ConvergenceResult {
        unstarted_lrp_keys,
        ..Default::default()
    }
}

pub fn missing_cells(input: &ConvergenceInput<'_>) -> ConvergenceResult {
    let mut result = ConvergenceResult::default();
    for lrp in input.ordinaries() {
        let Some(identity) = lrp.identity() else {
            continue;
        };
        if input.cells.has_cell_id(&identity.cell_id) {
            continue;
        }
        result.missing_cell_ids.push(identity.cell_id.clone());
        if let Some(key) = input.with_desired(lrp) {
            result.keys_with_missing_cells.push(key);
        }
    }
    result.suspect_keys_with_existing_cells = input
        .suspects()
        .filter(|lrp| input.cells.has_cell_id(lrp.cell_id()))
        .map(|lrp| lrp.key.clone())
        .collect();

    if !result.missing_cell_ids.is_empty() {
        event!(Level::INFO, cell_ids = ?result.missing_cell_ids, "detected-missing-cells");
    }
    result
}

/// Missing indices are always reported; extra ones only for fresh domains.
pub fn instance_counts(input: &ConvergenceInput<'_>) -> ConvergenceResult {
    let mut existing: BTreeMap<&str, BTreeMap<i32, &ActualLrp>> = BTreeMap::new();
    for lrp in input
        .lrps
        .iter()
        .filter(|lrp| lrp.presence != Presence::Evacuating)
    {
        existing
            .entry(lrp.key.process_guid.as_str())
            .or_default()
            .insert(lrp.key.index, lrp);
    }

    let mut result = ConvergenceResult::default();
    for info in input.desired.values() {
        let indices = existing.get(info.process_guid.as_str());
        for index in 0..info.instances {
            if indices.is_some_and(|indices| indices.contains_key(&index)) {
                continue;
            }
            event!(
                Level::INFO,
                reason = "missing-instance",
                process_guid = %info.process_guid,
                index,
                "creating-start-request"
            );
            result
                .missing_lrp_keys
                .push(ActualLrpKeyWithSchedulingInfo::new(info, index));
        }

        if !input.fresh_domains.contains(&info.domain) {
            continue;
        }
        for (&index, lrp) in indices.into_iter().flatten() {
            if index >= info.instances {
                result.keys_to_retire.push(lrp.key.clone());
            }
        }
    }
    result
}

pub fn orphans(input: &ConvergenceInput<'_>) -> ConvergenceResult {
    let mut result = ConvergenceResult::default();
    for lrp in &input.lrps {
        if input.desired.contains_key(&lrp.key.process_guid) {
            continue;
        }
        match lrp.presence {
            Presence::Ordinary | Presence::Evacuating => result.keys_to_retire.push(lrp.key.clone()),
            Presence::Suspect => result.suspect_keys_to_retire.push(lrp.key.clone()),
        }
    }
    result
}

/// A suspect is retired once its slot has no ordinary row left or the
/// ordinary replacement is running.
pub fn suspects(input: &ConvergenceInput<'_>) -> ConvergenceResult {
    let ordinaries: BTreeMap<(String, i32), &ActualLrp> =
        input.ordinaries().map(|lrp| (slot(lrp), lrp)).collect();

    let mut result = ConvergenceResult::default();
    for suspect in input.suspects() {
        match suspect.kind() {
            StateKind::Running => result.suspect_running_keys.push(suspect.key.clone()),
            StateKind::Claimed => result.suspect_claimed_keys.push(suspect.key.clone()),
            _ => {}
        }
        if !input.desired.contains_key(&suspect.key.process_guid) {
            continue;
        }
        let retire = match ordinaries.get(&slot(suspect)) {
            None => true,
            Some(ordinary) => ordinary.kind() == StateKind::Running,
        };
        if retire {
            result.suspect_keys_to_retire.push(suspect.key.clone());
        }
    }
    result
}

/// Runs every classification over one snapshot.
pub fn classify(input: &ConvergenceInput<'_>) -> ConvergenceResult {
    let checks: [fn(&ConvergenceInput<'_>) -> ConvergenceResult; 6] = [
        stale_unclaimed,
        crashed_restartable,
        missing_cells,
        instance_counts,
        orphans,
        suspects,
    ];
    checks
        .into_iter()
        .fold(ConvergenceResult::default(), |acc, check| acc.merge(check(input)))
        .finalize()
}

#[async_trait]
pub trait LrpConvergence: Send + Sync {
    async fn converge_lrps(
        &self,
        cells: &CellSet,
        config: &LrpConvergenceConfig,
    ) -> ConvergenceResult;
}

impl StateDb {
    /// Deletes evacuating shadows left on cells that are gone. Each row is
    /// re-checked under its lock before it is removed.
    pub(crate) async fn prune_evacuating(&self, cells: &CellSet) -> Result<Vec<Event>> {
        let stale = |row: &ActualLrpRow| {
            row.presence == Presence::Evacuating && !cells.has_cell_id(&row.cell_id)
        };
        let candidates = self
            .scan_records::<ActualLrp, _>(|row: &ActualLrpRow| stale(row))
            .await
            .records;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<ActualLrpRowKey> = candidates
            .iter()
            .map(|lrp| ActualLrpRowKey::new(&lrp.key.process_guid, lrp.key.index, lrp.presence))
            .collect();
        let mut txn = self.begin();
        txn.lock_rows::<ActualLrpRow, _>(keys.iter().cloned()).await?;

        let mut pruned = Vec::new();
        for (key, lrp) in keys.iter().zip(candidates) {
            let still_stale = txn.get::<ActualLrpRow>(key).await?.is_some_and(|row| stale(&row));
            if still_stale && txn.delete::<ActualLrpRow>(key).await? {
                pruned.push(lrp);
            }
        }
        txn.commit().await?;

        event!(Level::INFO, pruned = pruned.len(), "pruned-evacuating-actual-lrps");
        Ok(pruned.iter().flat_map(Event::actual_lrp_removed).collect())
    }

    fn emit_lrp_metrics(&self, lrps: &[ActualLrp], cells: &CellSet, result: &ConvergenceResult) {
        let count = |presence: Presence, kind: StateKind| {
            lrps.iter()
                .filter(|lrp| lrp.presence == presence && lrp.kind() == kind)
                .count() as i64
        };
        let gauges = [
            (metrics::LRPS_MISSING, result.missing_lrp_keys.len() as i64),
            (metrics::LRPS_EXTRA, result.keys_to_retire.len() as i64),
            (metrics::LRPS_UNCLAIMED, count(Presence::Ordinary, StateKind::Unclaimed)),
            (metrics::LRPS_CLAIMED, count(Presence::Ordinary, StateKind::Claimed)),
            (metrics::LRPS_RUNNING, count(Presence::Ordinary, StateKind::Running)),
            (metrics::CRASHED_ACTUAL_LRPS, count(Presence::Ordinary, StateKind::Crashed)),
            (metrics::SUSPECT_RUNNING_ACTUAL_LRPS, count(Presence::Suspect, StateKind::Running)),
            (metrics::SUSPECT_CLAIMED_ACTUAL_LRPS, count(Presence::Suspect, StateKind::Claimed)),
            (metrics::PRESENT_CELLS, cells.len() as i64),
        ];
        for (name, value) in gauges {
            emit(name, self.metrics.send_gauge(name, value));
        }
    }
}

#[async_trait]
impl LrpConvergence for StateDb {
    async fn converge_lrps(
        &self,
        cells: &CellSet,
        config: &LrpConvergenceConfig,
    ) -> ConvergenceResult {
        let span = info_span!("converge-lrps", cells = cells.len());
        async move {
            let started = Instant::now();
            emit(
                metrics::CONVERGENCE_LRP_RUNS,
                self.metrics
                    .increment_counter(metrics::CONVERGENCE_LRP_RUNS, 1),
            );

            if let Err(err) = self.prune_domains().await {
                event!(Level::ERROR, error = %err, "failed-pruning-domains");
            }
            let events = match self.prune_evacuating(cells).await {
                Ok(events) => events,
                Err(err) => {
                    event!(Level::ERROR, error = %err, "failed-pruning-evacuating-actual-lrps");
                    Vec::new()
                }
            };

            // Without the domain list nothing counts as fresh, so no extra
            // instance is retired this round.
            let fresh_domains = match self.fresh_domains().await {
                Ok(domains) => domains.into_iter().collect(),
                Err(err) => {
                    event!(Level::ERROR, error = %err, "failed-listing-domains");
                    BTreeSet::new()
                }
            };
            let desired = match self.desired_lrp_scheduling_infos().await {
                Ok(infos) => infos
                    .into_iter()
                    .map(|info| (info.process_guid.clone(), info))
                    .collect(),
                Err(err) => {
                    event!(Level::ERROR, error = %err, "failed-fetching-desired-lrps");
                    BTreeMap::new()
                }
            };
            let lrps = self
                .scan_records::<ActualLrp, _>(|_: &ActualLrpRow| true)
                .await
                .records;

            let input = ConvergenceInput {
                lrps,
                desired,
                fresh_domains,
                cells,
                now: self.now(),
                config,
                restart_policy: &self.restart_policy,
            };
            let mut result = classify(&input);
            result.events = events;

            self.emit_lrp_metrics(&input.lrps, cells, &result);
            emit(
                metrics::CONVERGENCE_LRP_DURATION,
                self.metrics
                    .send_duration(metrics::CONVERGENCE_LRP_DURATION, started.elapsed()),
            );
            event!(
                Level::INFO,
                missing = result.missing_lrp_keys.len(),
                unstarted = result.unstarted_lrp_keys.len(),
                missing_cells = result.keys_with_missing_cells.len(),
                retire = result.keys_to_retire.len(),
                suspects_to_retire = result.suspect_keys_to_retire.len(),
                events = result.events.len(),
                "converged-lrps"
            );
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActualLrpState, CellPresence, InstanceIdentity, NetInfo};
    use chrono::TimeDelta;

    fn lrp(guid: &str, index: i32, presence: Presence, state: ActualLrpState) -> ActualLrp {
        let mut lrp = ActualLrp::new_unclaimed(
            ActualLrpKey::new(guid, index, "cf-apps"),
            "epoch".into(),
            Utc::now() - TimeDelta::minutes(1),
        );
        lrp.presence = presence;
        lrp.state = state;
        lrp
    }

    fn running(cell: &str) -> ActualLrpState {
        ActualLrpState::Running {
            instance: InstanceIdentity::new("ig", cell),
            net_info: NetInfo::new("10.0.0.1", vec![]),
        }
    }

    fn classify_with(lrps: Vec<ActualLrp>, desired: &[(&str, i32)], cells: &CellSet) -> ConvergenceResult {
        let config = LrpConvergenceConfig::default();
        let policy = RestartPolicy::default();
        let input = ConvergenceInput {
            lrps,
            desired: desired
                .iter()
                .map(|(guid, n)| {
                    (guid.to_string(), DesiredLrpSchedulingInfo::new(guid, "cf-apps", *n))
                })
                .collect(),
            fresh_domains: BTreeSet::from(["cf-apps".to_string()]),
            cells,
            now: Utc::now(),
            config: &config,
            restart_policy: &policy,
        };
        classify(&input)
    }

    #[test]
    fn test_missing_cells_are_collected_once() {
        let cells: CellSet = [CellPresence::new("cell-a", "addr", "z1")].into_iter().collect();
        let result = classify_with(
            vec![
                lrp("pg", 0, Presence::Ordinary, running("cell-gone")),
                lrp("pg", 1, Presence::Ordinary, running("cell-gone")),
                lrp("pg", 2, Presence::Ordinary, running("cell-a")),
            ],
            &[("pg", 3)],
            &cells,
        );
        assert_eq!(result.keys_with_missing_cells.len(), 2);
        assert_eq!(result.missing_cell_ids, vec!["cell-gone".to_string()]);
        assert!(result.missing_lrp_keys.is_empty());
    }

    #[test]
    fn test_suspect_is_retired_once_replacement_runs() {
        let cells: CellSet = [CellPresence::new("cell-a", "addr", "z1")].into_iter().collect();
        let result = classify_with(
            vec![
                lrp("pg", 0, Presence::Suspect, running("cell-b")),
                lrp("pg", 0, Presence::Ordinary, running("cell-a")),
            ],
            &[("pg", 1)],
            &cells,
        );
        assert_eq!(result.suspect_keys_to_retire.len(), 1);
        assert_eq!(result.suspect_running_keys.len(), 1);
        assert!(result.suspect_keys_with_existing_cells.is_empty());
    }

    #[test]
    fn test_orphaned_suspect_uses_suspect_list() {
        let cells: CellSet = [CellPresence::new("cell-b", "addr", "z1")].into_iter().collect();
        let result = classify_with(
            vec![lrp("orphan", 0, Presence::Suspect, running("cell-b"))],
            &[],
            &cells,
        );
        assert!(result.keys_to_retire.is_empty());
        assert_eq!(result.suspect_keys_to_retire[0].process_guid, "orphan");
        assert_eq!(result.suspect_keys_with_existing_cells.len(), 1);
    }

    #[test]
    fn test_extra_instances_kept_for_stale_domain() {
        let cells = CellSet::new();
        let config = LrpConvergenceConfig::default();
        let policy = RestartPolicy::default();
        let input = ConvergenceInput {
            lrps: vec![lrp("pg", 3, Presence::Ordinary, ActualLrpState::unclaimed())],
            desired: BTreeMap::from([(
                "pg".to_string(),
                DesiredLrpSchedulingInfo::new("pg", "cf-apps", 1),
            )]),
            fresh_domains: BTreeSet::new(),
            cells: &cells,
            now: Utc::now(),
            config: &config,
            restart_policy: &policy,
        };
        let result = instance_counts(&input);
        assert!(result.keys_to_retire.is_empty());
        assert_eq!(result.missing_lrp_keys.len(), 1);
    }
}

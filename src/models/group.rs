use super::actual_lrp::{ActualLrp, Presence, StateKind};
use std::collections::BTreeMap;

/// All presence-rows of one instance slot, resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualLrpGroup {
    /// The authoritative record: Ordinary or Suspect.
    pub instance: Option<ActualLrp>,
    /// Shadow left behind by a draining cell.
    pub evacuating: Option<ActualLrp>,
}

impl ActualLrpGroup {
    pub fn is_empty(&self) -> bool {
        self.instance.is_none() && self.evacuating.is_none()
    }

    fn absorb(&mut self, lrp: ActualLrp) {
        match lrp.presence {
            Presence::Evacuating => self.evacuating = Some(lrp),
            Presence::Suspect => self.instance = Some(prefer(self.instance.take(), lrp)),
            Presence::Ordinary => self.instance = Some(prefer(self.instance.take(), lrp)),
        }
    }
}

/// An instance slot can briefly hold both a Suspect row and its Ordinary
/// replacement; the Suspect stays authoritative until the replacement runs.
fn prefer(current: Option<ActualLrp>, candidate: ActualLrp) -> ActualLrp {
    let Some(current) = current else {
        return candidate;
    };
    let (suspect, ordinary) = match (current.presence, candidate.presence) {
        (Presence::Suspect, Presence::Ordinary) => (current, candidate),
        (Presence::Ordinary, Presence::Suspect) => (candidate, current),
        _ => return candidate,
    };
    if ordinary.kind() == StateKind::Running {
        ordinary
    } else {
        suspect
    }
}

/// Groups rows by `(process_guid, index)`, ordered by that pair.
pub fn resolve_groups(lrps: impl IntoIterator<Item = ActualLrp>) -> Vec<ActualLrpGroup> {
    let mut groups: BTreeMap<(String, i32), ActualLrpGroup> = BTreeMap::new();
    for lrp in lrps {
        groups
            .entry((lrp.key.process_guid.clone(), lrp.key.index))
            .or_default()
            .absorb(lrp);
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::actual_lrp::{
        ActualLrpKey, ActualLrpState, InstanceIdentity, NetInfo,
    };
    use chrono::Utc;

    fn lrp(index: i32, presence: Presence, state: ActualLrpState) -> ActualLrp {
        let mut lrp = ActualLrp::new_unclaimed(
            ActualLrpKey::new("pg", index, "domain"),
            "epoch".into(),
            Utc::now(),
        );
        lrp.presence = presence;
        lrp.state = state;
        lrp
    }

    fn running(cell: &str) -> ActualLrpState {
        ActualLrpState::Running {
            instance: InstanceIdentity::new(&format!("ig-{}", cell), cell),
            net_info: NetInfo::new("1.1.1.1", vec![]),
        }
    }

    #[test]
    fn test_instance_and_shadow_share_a_group() {
        let groups = resolve_groups(vec![
            lrp(0, Presence::Ordinary, running("new-cell")),
            lrp(0, Presence::Evacuating, running("old-cell")),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].instance.as_ref().unwrap().cell_id(), "new-cell");
        assert_eq!(groups[0].evacuating.as_ref().unwrap().cell_id(), "old-cell");
    }

    #[test]
    fn test_indices_are_never_merged() {
        let groups = resolve_groups(vec![
            lrp(0, Presence::Ordinary, ActualLrpState::unclaimed()),
            lrp(1, Presence::Ordinary, ActualLrpState::unclaimed()),
            lrp(1, Presence::Evacuating, running("cell")),
        ]);
        assert_eq!(groups.len(), 2);
        assert!(groups[0].evacuating.is_none());
        assert_eq!(groups[1].instance.as_ref().unwrap().key.index, 1);
    }

    #[test]
    fn test_suspect_wins_until_replacement_runs() {
        let pending = resolve_groups(vec![
            lrp(0, Presence::Suspect, running("lost-cell")),
            lrp(0, Presence::Ordinary, ActualLrpState::unclaimed()),
        ]);
        assert_eq!(
            pending[0].instance.as_ref().unwrap().presence,
            Presence::Suspect
        );

        let replaced = resolve_groups(vec![
            lrp(0, Presence::Ordinary, running("fresh-cell")),
            lrp(0, Presence::Suspect, running("lost-cell")),
        ]);
        assert_eq!(
            replaced[0].instance.as_ref().unwrap().presence,
            Presence::Ordinary
        );
    }
}

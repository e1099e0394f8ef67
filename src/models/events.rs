use super::actual_lrp::{ActualLrp, ActualLrpKey, InstanceIdentity, StateKind};
use super::group::ActualLrpGroup;
use super::task::Task;
use chrono::{DateTime, Utc};

/// Change notifications for the event hub.
///
/// Group-level events describe the resolved slot; instance-level events
/// describe a single presence-row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ActualLrpCreated {
        group: ActualLrpGroup,
    },
    ActualLrpChanged {
        before: ActualLrpGroup,
        after: ActualLrpGroup,
    },
    ActualLrpRemoved {
        group: ActualLrpGroup,
    },
    ActualLrpInstanceCreated {
        lrp: ActualLrp,
    },
    ActualLrpInstanceChanged {
        before: ActualLrp,
        after: ActualLrp,
    },
    ActualLrpInstanceRemoved {
        lrp: ActualLrp,
    },
    ActualLrpCrashed {
        key: ActualLrpKey,
        identity: InstanceIdentity,
        crash_count: u32,
        crash_reason: String,
        since: DateTime<Utc>,
    },
    TaskCreated {
        task: Task,
    },
    TaskChanged {
        before: Task,
        after: Task,
    },
    TaskRemoved {
        task: Task,
    },
}

fn group_of(lrp: &ActualLrp) -> ActualLrpGroup {
    match lrp.presence {
        super::actual_lrp::Presence::Evacuating => ActualLrpGroup {
            instance: None,
            evacuating: Some(lrp.clone()),
        },
        _ => ActualLrpGroup {
            instance: Some(lrp.clone()),
            evacuating: None,
        },
    }
}

impl Event {
    pub fn actual_lrp_created(lrp: &ActualLrp) -> Vec<Event> {
        vec![
            Event::ActualLrpCreated {
                group: group_of(lrp),
            },
            Event::ActualLrpInstanceCreated { lrp: lrp.clone() },
        ]
    }

    /// Nothing is emitted for a no-op transition.
    pub fn actual_lrp_changed(before: &ActualLrp, after: &ActualLrp) -> Vec<Event> {
        if before == after {
            return Vec::new();
        }
        vec![
            Event::ActualLrpChanged {
                before: group_of(before),
                after: group_of(after),
            },
            Event::ActualLrpInstanceChanged {
                before: before.clone(),
                after: after.clone(),
            },
        ]
    }

    pub fn actual_lrp_removed(lrp: &ActualLrp) -> Vec<Event> {
        vec![
            Event::ActualLrpRemoved {
                group: group_of(lrp),
            },
            Event::ActualLrpInstanceRemoved { lrp: lrp.clone() },
        ]
    }

    /// Changed events for a crash report, plus the crash notice itself.
    pub fn actual_lrp_crashed(before: &ActualLrp, after: &ActualLrp) -> Vec<Event> {
        let mut events = Event::actual_lrp_changed(before, after);
        if let Some(identity) = before.identity() {
            if matches!(after.kind(), StateKind::Crashed | StateKind::Unclaimed) {
                events.push(Event::ActualLrpCrashed {
                    key: after.key.clone(),
                    identity: identity.clone(),
                    crash_count: after.crash_count,
                    crash_reason: after.crash_reason.clone(),
                    since: after.since,
                });
            }
        }
        events
    }

    pub fn task_changed(before: &Task, after: &Task) -> Option<Event> {
        (before != after).then(|| Event::TaskChanged {
            before: before.clone(),
            after: after.clone(),
        })
    }

    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            Event::ActualLrpRemoved { .. }
                | Event::ActualLrpInstanceRemoved { .. }
                | Event::TaskRemoved { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::actual_lrp::{ActualLrpState, NetInfo, Presence};

    fn running() -> ActualLrp {
        let mut lrp = ActualLrp::new_unclaimed(
            ActualLrpKey::new("pg", 0, "domain"),
            "epoch".into(),
            Utc::now(),
        );
        lrp.state = ActualLrpState::Running {
            instance: InstanceIdentity::new("ig", "cell"),
            net_info: NetInfo::new("1.1.1.1", vec![]),
        };
        lrp
    }

    #[test]
    fn test_no_events_for_noop() {
        let lrp = running();
        assert!(Event::actual_lrp_changed(&lrp, &lrp).is_empty());
    }

    #[test]
    fn test_evacuating_removal_targets_the_shadow() {
        let mut lrp = running();
        lrp.presence = Presence::Evacuating;
        let events = Event::actual_lrp_removed(&lrp);
        assert_eq!(events.len(), 2);
        match &events[0] {
            Event::ActualLrpRemoved { group } => {
                assert!(group.instance.is_none());
                assert!(group.evacuating.is_some());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.iter().all(Event::is_removal));
    }

    #[test]
    fn test_crash_emits_crash_notice() {
        let before = running();
        let mut after = before.clone();
        after.state = ActualLrpState::Crashed;
        after.crash_count = 4;
        after.crash_reason = "oom".into();
        after.modification_tag.increment();

        let events = Event::actual_lrp_crashed(&before, &after);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[2],
            Event::ActualLrpCrashed { crash_count: 4, crash_reason, .. } if crash_reason == "oom"
        ));
    }
}

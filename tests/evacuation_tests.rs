/// Evacuation and suspect presence tests
///
/// Run with: cargo test --test evacuation_tests
mod common;

use common::{Harness, identity, key, net_info};
use convergedb::models::{ActualLrpKey, Presence, StateKind};
use convergedb::{ActualLrpDb, ActualLrpFilter, DbError, EvacuationDb};

async fn rows_per_presence(h: &Harness, lrp_key: &ActualLrpKey) -> [usize; 3] {
    let rows = h
        .db
        .actual_lrps(
            &ActualLrpFilter::new()
                .process_guid(&lrp_key.process_guid)
                .index(lrp_key.index),
        )
        .await
        .unwrap();
    let count = |presence: Presence| rows.iter().filter(|lrp| lrp.presence == presence).count();
    [
        count(Presence::Ordinary),
        count(Presence::Evacuating),
        count(Presence::Suspect),
    ]
}

#[tokio::test]
async fn test_evacuate_creates_running_shadow() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    let owner = identity("ig-a", "cell-a");

    let shadow = h
        .db
        .evacuate_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(shadow.presence, Presence::Evacuating);
    assert_eq!(shadow.kind(), StateKind::Running);
    assert_eq!(shadow.crash_count, 0);

    let err = h
        .db
        .evacuate_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
        .await
        .unwrap_err();
    assert_eq!(err, DbError::ResourceExists);

    let moved = h
        .db
        .evacuate_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.2"))
        .await
        .unwrap();
    assert_eq!(moved.modification_tag.epoch, shadow.modification_tag.epoch);
    assert_eq!(moved.modification_tag.index, shadow.modification_tag.index + 1);
    assert_eq!(rows_per_presence(&h, &lrp_key).await, [0, 1, 0]);
}

#[tokio::test]
async fn test_remove_evacuating_requires_owner() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    let owner = identity("ig-a", "cell-a");
    h.db.evacuate_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
        .await
        .unwrap();

    let err = h
        .db
        .remove_evacuating_actual_lrp(&lrp_key, &identity("ig-b", "cell-a"))
        .await
        .unwrap_err();
    assert_eq!(err, DbError::ActualLrpCannotBeRemoved);

    let removed = h
        .db
        .remove_evacuating_actual_lrp(&lrp_key, &owner)
        .await
        .unwrap();
    assert_eq!(removed.map(|lrp| lrp.presence), Some(Presence::Evacuating));

    let again = h
        .db
        .remove_evacuating_actual_lrp(&lrp_key, &owner)
        .await
        .unwrap();
    assert!(again.is_none());
}

#[tokio::test]
async fn test_at_most_one_row_per_presence() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    let old = identity("ig-a", "cell-a");
    let new = identity("ig-b", "cell-b");

    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();
    h.db.start_actual_lrp(&lrp_key, &old, &net_info("10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(rows_per_presence(&h, &lrp_key).await, [1, 0, 0]);

    // Cell a drains: the running instance is shadowed and rescheduled.
    h.db.evacuate_actual_lrp(&lrp_key, &old, &net_info("10.0.0.1"))
        .await
        .unwrap();
    h.db.unclaim_actual_lrp(&lrp_key).await.unwrap();
    let err = h
        .db
        .evacuate_actual_lrp(&lrp_key, &old, &net_info("10.0.0.1"))
        .await
        .unwrap_err();
    assert_eq!(err, DbError::ResourceExists);
    let shadow = h
        .db
        .evacuate_actual_lrp(&lrp_key, &old, &net_info("10.0.0.9"))
        .await
        .unwrap();
    assert_eq!(shadow.presence, Presence::Evacuating);
    assert_eq!(shadow.modification_tag.index, 1);
    assert_eq!(rows_per_presence(&h, &lrp_key).await, [1, 1, 0]);

    h.db.start_actual_lrp(&lrp_key, &new, &net_info("10.0.0.2"))
        .await
        .unwrap();
    h.db.remove_evacuating_actual_lrp(&lrp_key, &old)
        .await
        .unwrap();
    assert_eq!(rows_per_presence(&h, &lrp_key).await, [1, 0, 0]);

    // Cell b goes missing: the row becomes a suspect and a replacement lands.
    h.db.change_actual_lrp_presence(&lrp_key, Presence::Ordinary, Presence::Suspect)
        .await
        .unwrap();
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();
    let err = h
        .db
        .change_actual_lrp_presence(&lrp_key, Presence::Ordinary, Presence::Suspect)
        .await
        .unwrap_err();
    assert_eq!(err, DbError::ResourceExists);
    assert_eq!(rows_per_presence(&h, &lrp_key).await, [1, 0, 1]);

    let group = h.db.actual_lrp_group("pg", 0).await.unwrap();
    assert_eq!(group.instance.unwrap().presence, Presence::Suspect);
}

#[tokio::test]
async fn test_remove_suspect() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    let owner = identity("ig-a", "cell-a");
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();
    h.db.start_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
        .await
        .unwrap();
    h.db.change_actual_lrp_presence(&lrp_key, Presence::Ordinary, Presence::Suspect)
        .await
        .unwrap();

    let removed = h
        .db
        .remove_suspect_actual_lrp(&lrp_key, &owner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(removed.presence, Presence::Suspect);
    assert_eq!(rows_per_presence(&h, &lrp_key).await, [0, 0, 0]);
    assert!(h
        .db
        .remove_suspect_actual_lrp(&lrp_key, &owner)
        .await
        .unwrap()
        .is_none());
}

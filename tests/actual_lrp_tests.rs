/// Actual LRP lifecycle tests
///
/// Claim/start/crash/fail/unclaim/remove against the transition guard.
/// Run with: cargo test --test actual_lrp_tests
mod common;

use common::{Harness, identity, key, net_info, secs};
use convergedb::models::{ActualLrpState, Presence, RestartPolicy, StateKind};
use convergedb::{ActualLrpDb, ActualLrpFilter, DbError, EvacuationDb};

#[tokio::test]
async fn test_create_then_claim() {
    let h = Harness::new();
    let created = h.db.create_unclaimed_actual_lrp(&key("pg", 0)).await.unwrap();
    assert_eq!(created.kind(), StateKind::Unclaimed);
    assert_eq!(created.modification_tag.epoch, "epoch-1");
    assert_eq!(created.modification_tag.index, 0);

    let (before, after) = h
        .db
        .claim_actual_lrp(&key("pg", 0), &identity("ig-a", "cell-a"))
        .await
        .unwrap();
    assert_eq!(before, created);
    assert_eq!(after.kind(), StateKind::Claimed);
    assert_eq!(after.cell_id(), "cell-a");
    assert_eq!(after.modification_tag.index, 1);

    let stored = h
        .db
        .actual_lrp_by_key("pg", 0, Presence::Ordinary)
        .await
        .unwrap();
    assert_eq!(stored, after);
}

#[tokio::test]
async fn test_create_duplicate_fails() {
    let h = Harness::new();
    h.db.create_unclaimed_actual_lrp(&key("pg", 0)).await.unwrap();
    let err = h.db.create_unclaimed_actual_lrp(&key("pg", 0)).await.unwrap_err();
    assert_eq!(err, DbError::ResourceExists);
}

#[tokio::test]
async fn test_guid_failure_aborts_create() {
    let h = Harness::new();
    h.guids.set_failing(true);
    let err = h.db.create_unclaimed_actual_lrp(&key("pg", 0)).await.unwrap_err();
    assert!(matches!(err, DbError::GuidGeneration(_)));

    let err = h
        .db
        .actual_lrp_by_key("pg", 0, Presence::Ordinary)
        .await
        .unwrap_err();
    assert_eq!(err, DbError::ResourceNotFound);
}

#[tokio::test]
async fn test_invalid_key_is_bad_request() {
    let h = Harness::new();
    let err = h.db.create_unclaimed_actual_lrp(&key("", 0)).await.unwrap_err();
    assert!(matches!(err, DbError::BadRequest(_)));

    let long_cell = "c".repeat(300);
    let err = h
        .db
        .claim_actual_lrp(&key("pg", 0), &identity("ig", &long_cell))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::BadRequest(_)));
}

#[tokio::test]
async fn test_start_twice_is_a_noop() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    let owner = identity("ig-a", "cell-a");
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();
    let (_, first) = h
        .db
        .start_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
        .await
        .unwrap();

    h.advance(secs(5));
    let (before, after) = h
        .db
        .start_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(before, Some(first.clone()));
    assert_eq!(after, first);
    assert_eq!(after.modification_tag, first.modification_tag);
    assert_eq!(after.since, first.since);
}

#[tokio::test]
async fn test_start_without_row_creates_running() {
    let h = Harness::new();
    let (before, after) = h
        .db
        .start_actual_lrp(&key("pg", 3), &identity("ig", "cell-a"), &net_info("10.0.0.3"))
        .await
        .unwrap();
    assert!(before.is_none());
    assert_eq!(after.kind(), StateKind::Running);
    assert_eq!(after.crash_count, 0);
    assert_eq!(after.modification_tag.index, 0);
    assert!(!after.modification_tag.epoch.is_empty());
}

#[tokio::test]
async fn test_start_with_new_address_bumps_tag() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    let owner = identity("ig-a", "cell-a");
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();
    let (_, first) = h
        .db
        .start_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
        .await
        .unwrap();
    let (_, second) = h
        .db
        .start_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.2"))
        .await
        .unwrap();
    assert_eq!(second.modification_tag.index, first.modification_tag.index + 1);
    assert_eq!(second.state.net_info().unwrap().address, "10.0.0.2");
}

enum Op {
    Claim(&'static str),
    Start(&'static str),
    Crash(&'static str),
    Fail,
    Unclaim,
}

/// Puts slot `index` of "guard" into the given state.
async fn slot_in(h: &Harness, index: i32, state: StateKind) {
    let lrp_key = key("guard", index);
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();
    let owner = identity("ig-a", "cell-a");
    match state {
        StateKind::Unclaimed => {}
        StateKind::Claimed => {
            h.db.claim_actual_lrp(&lrp_key, &owner).await.unwrap();
        }
        StateKind::Running => {
            h.db.start_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
                .await
                .unwrap();
        }
        StateKind::Crashed => {
            h.db.start_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
                .await
                .unwrap();
            let (_, after, restarted) = h.db.crash_actual_lrp(&lrp_key, &owner, "boom").await.unwrap();
            assert!(!restarted);
            assert_eq!(after.kind(), StateKind::Crashed);
        }
    }
}

#[tokio::test]
async fn test_illegal_transitions_are_rejected_without_writes() {
    let h = Harness::with_policy(RestartPolicy::default().max_immediate_restarts(0));
    let cases = [
        (StateKind::Unclaimed, Op::Crash("ig-a"), DbError::ActualLrpCannotBeCrashed),
        (StateKind::Unclaimed, Op::Unclaim, DbError::ActualLrpCannotBeUnclaimed),
        (StateKind::Claimed, Op::Claim("ig-b"), DbError::ActualLrpCannotBeClaimed),
        (StateKind::Claimed, Op::Start("ig-b"), DbError::ActualLrpCannotBeStarted),
        (StateKind::Claimed, Op::Crash("ig-b"), DbError::ActualLrpCannotBeCrashed),
        (StateKind::Claimed, Op::Fail, DbError::ActualLrpCannotBeFailed),
        (StateKind::Running, Op::Claim("ig-a"), DbError::ActualLrpCannotBeClaimed),
        (StateKind::Running, Op::Start("ig-b"), DbError::ActualLrpCannotBeStarted),
        (StateKind::Running, Op::Crash("ig-b"), DbError::ActualLrpCannotBeCrashed),
        (StateKind::Running, Op::Fail, DbError::ActualLrpCannotBeFailed),
        (StateKind::Crashed, Op::Crash("ig-a"), DbError::ActualLrpCannotBeCrashed),
        (StateKind::Crashed, Op::Unclaim, DbError::ActualLrpCannotBeUnclaimed),
        (StateKind::Crashed, Op::Fail, DbError::ActualLrpCannotBeFailed),
    ];

    for (index, (state, op, expected)) in cases.into_iter().enumerate() {
        let index = index as i32;
        slot_in(&h, index, state).await;
        let lrp_key = key("guard", index);
        let snapshot = h
            .db
            .actual_lrp_by_key("guard", index, Presence::Ordinary)
            .await
            .unwrap();

        let err = match op {
            Op::Claim(guid) => h
                .db
                .claim_actual_lrp(&lrp_key, &identity(guid, "cell-a"))
                .await
                .map(|_| ()),
            Op::Start(guid) => h
                .db
                .start_actual_lrp(&lrp_key, &identity(guid, "cell-a"), &net_info("10.0.0.9"))
                .await
                .map(|_| ()),
            Op::Crash(guid) => h
                .db
                .crash_actual_lrp(&lrp_key, &identity(guid, "cell-a"), "boom")
                .await
                .map(|_| ()),
            Op::Fail => h.db.fail_actual_lrp(&lrp_key, "no capacity").await.map(|_| ()),
            Op::Unclaim => h.db.unclaim_actual_lrp(&lrp_key).await.map(|_| ()),
        }
        .unwrap_err();
        assert_eq!(err, expected, "case {} from {}", index, state);

        let reread = h
            .db
            .actual_lrp_by_key("guard", index, Presence::Ordinary)
            .await
            .unwrap();
        assert_eq!(reread, snapshot, "case {} mutated the row", index);
    }
}

#[tokio::test]
async fn test_crashed_slot_can_be_claimed_again() {
    let h = Harness::with_policy(RestartPolicy::default().max_immediate_restarts(0));
    slot_in(&h, 0, StateKind::Crashed).await;
    let (_, after) = h
        .db
        .claim_actual_lrp(&key("guard", 0), &identity("ig-b", "cell-b"))
        .await
        .unwrap();
    assert_eq!(after.kind(), StateKind::Claimed);
    assert_eq!(after.crash_count, 1);
}

#[tokio::test]
async fn test_crash_counter_resets_after_stable_run() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    let owner = identity("ig-a", "cell-a");
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();

    for expected in 1..=2 {
        h.db.start_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
            .await
            .unwrap();
        let (_, after, restarted) = h.db.crash_actual_lrp(&lrp_key, &owner, "oom").await.unwrap();
        assert_eq!(after.crash_count, expected);
        assert!(restarted);
        assert_eq!(after.kind(), StateKind::Unclaimed);
        assert_eq!(after.crash_reason, "oom");
    }

    h.db.start_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
        .await
        .unwrap();
    h.advance(secs(6 * 60));
    let (before, after, _) = h.db.crash_actual_lrp(&lrp_key, &owner, "oom").await.unwrap();
    assert_eq!(before.crash_count, 2);
    assert_eq!(after.crash_count, 1);
}

#[tokio::test]
async fn test_crash_past_immediate_restarts_stays_crashed() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    let owner = identity("ig-a", "cell-a");
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();

    let mut last = None;
    for _ in 0..3 {
        h.db.start_actual_lrp(&lrp_key, &owner, &net_info("10.0.0.1"))
            .await
            .unwrap();
        last = Some(h.db.crash_actual_lrp(&lrp_key, &owner, "exit 1").await.unwrap());
    }
    let (_, after, restarted) = last.unwrap();
    assert!(!restarted);
    assert_eq!(after.kind(), StateKind::Crashed);
    assert_eq!(after.crash_count, 3);
    assert!(after.identity().is_none());
}

#[tokio::test]
async fn test_long_crash_reason_is_truncated() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    let owner = identity("ig-a", "cell-a");
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();
    h.db.claim_actual_lrp(&lrp_key, &owner).await.unwrap();

    let reason = "x".repeat(5000);
    let (_, after, _) = h.db.crash_actual_lrp(&lrp_key, &owner, &reason).await.unwrap();
    assert_eq!(after.crash_reason.len(), 1024);
    assert!(after.crash_reason.ends_with("(truncated)"));
}

#[tokio::test]
async fn test_fail_records_placement_error_and_claim_clears_it() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();

    let (_, failed) = h.db.fail_actual_lrp(&lrp_key, "insufficient resources").await.unwrap();
    assert_eq!(failed.state.placement_error(), Some("insufficient resources"));

    let err = h.db.fail_actual_lrp(&lrp_key, "").await.unwrap_err();
    assert!(matches!(err, DbError::BadRequest(_)));

    let (_, claimed) = h
        .db
        .claim_actual_lrp(&lrp_key, &identity("ig", "cell-a"))
        .await
        .unwrap();
    assert_eq!(claimed.state.placement_error(), None);
}

#[tokio::test]
async fn test_unclaim_running_clears_identity() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();
    h.db.start_actual_lrp(&lrp_key, &identity("ig", "cell-a"), &net_info("10.0.0.1"))
        .await
        .unwrap();

    let (before, after) = h.db.unclaim_actual_lrp(&lrp_key).await.unwrap();
    assert_eq!(before.kind(), StateKind::Running);
    assert_eq!(after.state, ActualLrpState::unclaimed());
    assert_eq!(after.cell_id(), "");
}

#[tokio::test]
async fn test_remove_checks_owner() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();
    h.db.claim_actual_lrp(&lrp_key, &identity("ig-a", "cell-a"))
        .await
        .unwrap();

    let err = h
        .db
        .remove_actual_lrp("pg", 0, Some(&identity("ig-b", "cell-b")))
        .await
        .unwrap_err();
    assert_eq!(err, DbError::ActualLrpCannotBeRemoved);

    let removed = h
        .db
        .remove_actual_lrp("pg", 0, Some(&identity("ig-a", "cell-a")))
        .await
        .unwrap();
    assert_eq!(removed.cell_id(), "cell-a");

    let err = h.db.remove_actual_lrp("pg", 0, None).await.unwrap_err();
    assert_eq!(err, DbError::ResourceNotFound);
}

#[tokio::test]
async fn test_change_presence_moves_row() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();
    let (_, running) = h
        .db
        .start_actual_lrp(&lrp_key, &identity("ig-a", "cell-a"), &net_info("10.0.0.1"))
        .await
        .unwrap();

    let (before, after) = h
        .db
        .change_actual_lrp_presence(&lrp_key, Presence::Ordinary, Presence::Suspect)
        .await
        .unwrap();
    assert_eq!(before, running);
    assert_eq!(after.presence, Presence::Suspect);
    assert_eq!(after.modification_tag.index, running.modification_tag.index + 1);

    let err = h
        .db
        .actual_lrp_by_key("pg", 0, Presence::Ordinary)
        .await
        .unwrap_err();
    assert_eq!(err, DbError::ResourceNotFound);

    let err = h
        .db
        .change_actual_lrp_presence(&lrp_key, Presence::Ordinary, Presence::Suspect)
        .await
        .unwrap_err();
    assert_eq!(err, DbError::ResourceNotFound);
}

#[tokio::test]
async fn test_group_query_resolves_presences() {
    let h = Harness::new();
    let lrp_key = key("pg", 0);
    h.db.create_unclaimed_actual_lrp(&lrp_key).await.unwrap();
    h.db.create_unclaimed_actual_lrp(&key("pg", 1)).await.unwrap();
    h.db.evacuate_actual_lrp(&lrp_key, &identity("ig-old", "cell-old"), &net_info("10.0.0.5"))
        .await
        .unwrap();

    let group = h.db.actual_lrp_group("pg", 0).await.unwrap();
    assert_eq!(group.instance.as_ref().unwrap().kind(), StateKind::Unclaimed);
    assert_eq!(group.evacuating.as_ref().unwrap().cell_id(), "cell-old");

    let groups = h
        .db
        .actual_lrp_groups(&ActualLrpFilter::new().process_guid("pg"))
        .await
        .unwrap();
    assert_eq!(groups.len(), 2);

    let on_old_cell = h
        .db
        .actual_lrps(&ActualLrpFilter::new().cell_id("cell-old"))
        .await
        .unwrap();
    assert_eq!(on_old_cell.len(), 1);
    assert_eq!(on_old_cell[0].presence, Presence::Evacuating);

    let err = h.db.actual_lrp_group("pg", 7).await.unwrap_err();
    assert_eq!(err, DbError::ResourceNotFound);
}

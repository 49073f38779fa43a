//! Promotion workflow invariant tests
//!
//! Driven end to end against the scripted fleet: the lag gate, forced
//! elections, idempotence, replica pinning, partial reconfiguration, and
//! the global deadline. Time is paused, so verification budgets and
//! deadlines elapse instantly.

mod common;

use std::time::Duration;

use common::Fixture;
use pgpilot::config::NodeSeed;
use pgpilot::failover::OpErrorKind;
use pgpilot::topology::{NodeKind, RoleHint};

#[tokio::test(start_paused = true)]
async fn test_first_election_from_no_primary() {
    let fixture = Fixture::cluster(None);

    let outcome = fixture
        .orchestrator
        .promote("node1".to_string())
        .await
        .unwrap();

    assert_eq!(outcome.new_primary, "node1");
    assert!(!outcome.already_primary);
    assert!(outcome.warnings.is_empty(), "warnings: {:?}", outcome.warnings);

    assert!(!fixture.sim.is_in_recovery("pg-node1"));
    assert!(fixture.sim.is_in_recovery("pg-node2"));
    assert!(fixture.sim.is_in_recovery("pg-node3"));
    assert!(fixture.sim.is_in_recovery("pg-replica-1"));

    assert_eq!(
        fixture.registry.get("node1").unwrap().role_hint,
        RoleHint::Primary
    );
    assert_eq!(
        fixture.registry.get("node2").unwrap().role_hint,
        RoleHint::Standby
    );
}

#[tokio::test(start_paused = true)]
async fn test_switch_primary_demotes_and_rebuilds_old_one() {
    let fixture = Fixture::cluster(Some("node1"));

    let outcome = fixture
        .orchestrator
        .promote("node2".to_string())
        .await
        .unwrap();

    assert_eq!(outcome.new_primary, "node2");
    assert!(outcome.warnings.is_empty(), "warnings: {:?}", outcome.warnings);
    assert!(!fixture.sim.is_in_recovery("pg-node2"));
    assert!(fixture.sim.is_in_recovery("pg-node1"));
    // The old primary was rebuilt from the new one.
    assert_eq!(fixture.sim.received("pg-node1"), 1_000);
}

#[tokio::test(start_paused = true)]
async fn test_lag_gate_refuses_behind_standby() {
    let fixture = Fixture::cluster(Some("node1"));
    // node3 is one byte short of the primary's write position.
    fixture.sim.set_wal("pg-node1", 1_000, 1_000);
    fixture.sim.set_wal("pg-node3", 1_000, 999);

    let err = fixture
        .orchestrator
        .promote("node3".to_string())
        .await
        .unwrap_err();

    assert_eq!(err.kind, OpErrorKind::LagTooHigh);
    assert_eq!(err.gap_bytes(), Some(1));

    // Nothing moved: the gate fires before any mutation.
    assert!(!fixture.sim.is_in_recovery("pg-node1"));
    assert!(fixture.sim.is_in_recovery("pg-node3"));
}

#[tokio::test(start_paused = true)]
async fn test_zero_gap_promotes() {
    let fixture = Fixture::cluster(Some("node1"));
    fixture.sim.set_wal("pg-node1", 1_000, 1_000);
    fixture.sim.set_wal("pg-node2", 1_000, 1_000);

    let outcome = fixture
        .orchestrator
        .promote("node2".to_string())
        .await
        .unwrap();
    assert_eq!(outcome.new_primary, "node2");
}

#[tokio::test(start_paused = true)]
async fn test_standby_ahead_of_sample_promotes() {
    let fixture = Fixture::cluster(Some("node1"));
    // Negative gap: the standby reports a position past the primary's
    // sample, which can happen while probes race ongoing writes.
    fixture.sim.set_wal("pg-node1", 1_000, 1_000);
    fixture.sim.set_wal("pg-node2", 1_000, 1_016);

    let outcome = fixture
        .orchestrator
        .promote("node2".to_string())
        .await
        .unwrap();
    assert_eq!(outcome.new_primary, "node2");
}

#[tokio::test(start_paused = true)]
async fn test_promote_current_primary_is_a_noop() {
    let fixture = Fixture::cluster(Some("node1"));
    let before = fixture.sim.exec_count();

    let outcome = fixture
        .orchestrator
        .promote("node1".to_string())
        .await
        .unwrap();

    assert!(outcome.already_primary);
    assert_eq!(fixture.sim.exec_count(), before, "no exec side effects");
}

#[tokio::test(start_paused = true)]
async fn test_promote_replica_is_invalid_target() {
    let fixture = Fixture::cluster(Some("node1"));
    let before = fixture.sim.exec_count();

    let err = fixture
        .orchestrator
        .promote("replica-1".to_string())
        .await
        .unwrap_err();

    assert_eq!(err.kind, OpErrorKind::InvalidTarget);
    assert_eq!(fixture.sim.exec_count(), before);
    assert!(fixture.sim.is_in_recovery("pg-replica-1"));
}

#[tokio::test(start_paused = true)]
async fn test_promote_unknown_node_is_invalid_target() {
    let fixture = Fixture::cluster(Some("node1"));
    let err = fixture
        .orchestrator
        .promote("ghost".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind, OpErrorKind::InvalidTarget);
}

#[tokio::test(start_paused = true)]
async fn test_promote_unreachable_target_is_unreachable() {
    let fixture = Fixture::cluster(Some("node1"));
    fixture.sim.set_sql_unreachable("pg-node2");

    let err = fixture
        .orchestrator
        .promote("node2".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind, OpErrorKind::Unreachable);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_promotes_one_wins_one_busy() {
    let fixture = Fixture::cluster(None);

    let (first, second) = tokio::join!(
        fixture.orchestrator.promote("node1".to_string()),
        fixture.orchestrator.promote("node3".to_string()),
    );

    let busy_count = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(err) if err.kind == OpErrorKind::Busy))
        .count();
    assert_eq!(busy_count, 1, "exactly one contender loses: {:?} {:?}", first, second);

    // The winner elected node1; node3's promote never started.
    assert!(!fixture.sim.is_in_recovery("pg-node1"));
    assert!(fixture.sim.is_in_recovery("pg-node3"));
}

#[tokio::test(start_paused = true)]
async fn test_demote_all_then_forced_election() {
    let fixture = Fixture::cluster(Some("node1"));

    let report = fixture.orchestrator.demote_all().await.unwrap();
    assert!(report.demoted.contains(&"node1".to_string()));
    assert_eq!(report.skipped, vec!["replica-1".to_string()]);
    assert!(report.failed.is_empty());
    assert!(fixture.sim.is_in_recovery("pg-node1"));
    assert!(fixture.sim.is_in_recovery("pg-node2"));
    assert!(fixture.sim.is_in_recovery("pg-node3"));

    // No primary left; the lag gate is skipped and the election succeeds.
    let outcome = fixture
        .orchestrator
        .promote("node2".to_string())
        .await
        .unwrap();
    assert_eq!(outcome.new_primary, "node2");
    assert!(!fixture.sim.is_in_recovery("pg-node2"));
}

#[tokio::test(start_paused = true)]
async fn test_demote_single_backup() {
    let fixture = Fixture::cluster(Some("node1"));

    let demoted = fixture
        .orchestrator
        .demote_one("node1".to_string())
        .await
        .unwrap();
    assert_eq!(demoted, "node1");
    assert!(fixture.sim.is_in_recovery("pg-node1"));
}

#[tokio::test(start_paused = true)]
async fn test_demote_replica_is_invalid_target() {
    let fixture = Fixture::cluster(Some("node1"));
    let err = fixture
        .orchestrator
        .demote_one("replica-1".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind, OpErrorKind::InvalidTarget);
}

#[tokio::test(start_paused = true)]
async fn test_failed_standby_rebuild_is_a_warning_not_a_failure() {
    let fixture = Fixture::cluster(Some("node1"));
    fixture.sim.with_node("pg-node3", |n| n.fail_basebackup = true);

    let outcome = fixture
        .orchestrator
        .promote("node2".to_string())
        .await
        .unwrap();

    assert_eq!(outcome.new_primary, "node2");
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("node3"), "{:?}", outcome.warnings);
    // The node that failed to re-attach is left UNKNOWN, not STANDBY.
    assert_eq!(
        fixture.registry.get("node3").unwrap().role_hint,
        RoleHint::Unknown
    );
    assert_eq!(
        fixture.registry.get("node1").unwrap().role_hint,
        RoleHint::Standby
    );
}

#[tokio::test(start_paused = true)]
async fn test_promote_fails_when_target_never_leaves_recovery() {
    let fixture = Fixture::cluster(None);
    fixture.sim.with_node("pg-node1", |n| n.ignore_promote = true);

    let err = fixture
        .orchestrator
        .promote("node1".to_string())
        .await
        .unwrap_err();

    assert_eq!(err.kind, OpErrorKind::PromoteFailed);
    assert!(err.message.contains("verify"), "{}", err.message);
}

#[tokio::test(start_paused = true)]
async fn test_global_deadline_abandons_and_releases_lock() {
    let fixture = Fixture::cluster(None);
    // Every driver call stalls far past the 180s promote budget.
    fixture.sim.set_latency(Duration::from_secs(3_600));

    let err = fixture
        .orchestrator
        .promote("node1".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind, OpErrorKind::Deadline);

    // The guard was dropped with the abandoned task; the lock is free.
    let seed = NodeSeed {
        name: "node4".to_string(),
        container: None,
        host: "pg-node4".to_string(),
        port: 5432,
        kind: NodeKind::Backup,
    };
    fixture.orchestrator.add_host(seed).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_lock_released_after_gate_refusal() {
    let fixture = Fixture::cluster(Some("node1"));
    fixture.sim.set_wal("pg-node3", 1_000, 0);

    let err = fixture
        .orchestrator
        .promote("node3".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind, OpErrorKind::LagTooHigh);

    // A follow-up operation must not see BUSY.
    let outcome = fixture
        .orchestrator
        .promote("node2".to_string())
        .await
        .unwrap();
    assert_eq!(outcome.new_primary, "node2");
}

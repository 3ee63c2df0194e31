//! Integration tests exercising the full proposal pipeline:
//! votes → deadline sweep → resolution → tally → LMDB persistence → readback.
//!
//! The ephemeral store is the in-memory nullable; the durable side is a real
//! LMDB environment in a temp dir.

use std::sync::Arc;

use proptest::prelude::*;

use liquid_node::{LiquidNode, NodeConfig, Phase, SnapshotManager, Stores, SweepReport};
use liquid_nullables::{NullClock, NullVotingStore};
use liquid_store::{AuditStore, ProposalStore, SnapshotStore, VotingStore};
use liquid_store_lmdb::{check_integrity, LmdbEnvironment};
use liquid_types::{
    AuditStatus, Proposal, ProposalId, ProposalOption, SnapshotKind, Timestamp, WalletAddress,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const NOW: u64 = 1_700_000_000;

fn temp_env() -> (tempfile::TempDir, LmdbEnvironment) {
    let dir = tempfile::tempdir().expect("temp dir");
    let env = LmdbEnvironment::open(dir.path(), 16, 64 * 1024 * 1024).expect("open env");
    (dir, env)
}

fn node_over(
    env: &LmdbEnvironment,
    clock: Arc<NullClock>,
    voting: Arc<NullVotingStore>,
) -> LiquidNode {
    let stores = Stores {
        voting,
        audit: Arc::new(env.audit_store()),
        snapshots: Arc::new(env.snapshot_store()),
        proposals: Arc::new(env.proposal_store()),
        clock,
    };
    LiquidNode::with_stores(NodeConfig::default(), stores).expect("node")
}

fn proposal(id: &str, deadline: u64) -> Proposal {
    Proposal {
        id: ProposalId::new(id),
        organization_id: "org".into(),
        options: vec![
            ProposalOption { number: 1, text: "approve".into() },
            ProposalOption { number: 2, text: "reject".into() },
        ],
        deadline: Timestamp::new(deadline),
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_proposal_is_resolved_and_tallied_into_lmdb() {
    let (_dir, env) = temp_env();
    let clock = Arc::new(NullClock::new(NOW));
    let voting = Arc::new(NullVotingStore::new(clock.clone()));
    env.proposal_store().put_proposal(&proposal("budget", NOW + 600)).unwrap();
    let node = node_over(&env, clock.clone(), voting.clone());

    let service = node.voting_service();
    service.delegate("budget", "alice", "bob").unwrap();
    service.delegate("budget", "bob", "carol").unwrap();
    service.cast_vote("budget", "carol", 1).unwrap();
    service.cast_vote("budget", "dave", 2).unwrap();

    // Nothing due yet: the deadline is only armed.
    let report = node.scheduler().run_sweep().unwrap();
    assert_eq!(report.scheduled, 1);
    node.scheduler().cancel(&ProposalId::new("budget"));

    clock.advance(601);
    let report = node.scheduler().run_sweep().unwrap();
    assert_eq!(
        report,
        SweepReport { scheduled: 0, processed: 1, failed: 0, skipped: 0 }
    );

    let p = ProposalId::new("budget");
    let audit = env.audit_store();
    let resolution = audit.get_resolution(&p).unwrap().unwrap();
    assert_eq!(resolution.status, AuditStatus::Completed);
    assert_eq!(resolution.voting_power[&WalletAddress::new("carol")], 3);
    assert_eq!(resolution.longest_chain, 2);

    let summary = audit.get_tally_summary(&p).unwrap().unwrap();
    assert_eq!(summary.winning_option, Some(1));
    assert_eq!(summary.total_voting_power, 4);
    assert_eq!(node.scheduler().phase(&p), Phase::TallyCompleted);

    let snaps = env.snapshot_store().list_snapshots(&p).unwrap();
    assert_eq!(snaps.len(), 1);
    assert_eq!(snaps[0].kind, SnapshotKind::PreCalculation);
    assert!(check_integrity(env.env()).unwrap().is_healthy());
}

#[tokio::test]
async fn restart_does_not_reprocess_completed_proposals() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(NullClock::new(NOW));
    let voting = Arc::new(NullVotingStore::new(clock.clone()));
    {
        let env = LmdbEnvironment::open_default(dir.path()).unwrap();
        env.proposal_store().put_proposal(&proposal("p", NOW - 1)).unwrap();
        voting.cast_vote(&ProposalId::new("p"), &WalletAddress::new("a"), 1).unwrap();
        let node = node_over(&env, clock.clone(), voting.clone());
        assert_eq!(node.scheduler().run_sweep().unwrap().processed, 1);
    }

    let env = LmdbEnvironment::open_default(dir.path()).unwrap();
    let node = node_over(&env, clock, voting);
    assert_eq!(node.scheduler().run_sweep().unwrap(), SweepReport::default());
    assert!(env.audit_store().list_errors(&ProposalId::new("p")).unwrap().is_empty());
}

#[tokio::test]
async fn outage_leaves_error_records_and_sweep_recovers() {
    let (_dir, env) = temp_env();
    let clock = Arc::new(NullClock::new(NOW));
    let voting = Arc::new(NullVotingStore::new(clock.clone()));
    env.proposal_store().put_proposal(&proposal("p", NOW - 1)).unwrap();
    voting.cast_vote(&ProposalId::new("p"), &WalletAddress::new("a"), 2).unwrap();
    let node = node_over(&env, clock.clone(), voting.clone());

    voting.set_unavailable(true);
    assert_eq!(node.scheduler().run_sweep().unwrap().failed, 1);
    let p = ProposalId::new("p");
    assert_eq!(node.scheduler().phase(&p), Phase::ResolutionFailed);
    assert!(!env.audit_store().list_errors(&p).unwrap().is_empty());
    assert!(env.audit_store().get_tally(&p).unwrap().is_none());

    voting.set_unavailable(false);
    assert_eq!(node.scheduler().run_sweep().unwrap().processed, 1);
    assert_eq!(
        env.audit_store().get_tally(&p).unwrap().unwrap().winning_option,
        Some(2)
    );
}

#[tokio::test]
async fn snapshot_restore_round_trip_through_lmdb() {
    let (_dir, env) = temp_env();
    let clock = Arc::new(NullClock::new(NOW));
    let voting = Arc::new(NullVotingStore::new(clock.clone()));
    env.proposal_store().put_proposal(&proposal("p", NOW + 3600)).unwrap();
    let node = node_over(&env, clock.clone(), voting.clone());
    let p = ProposalId::new("p");

    node.voting_service().delegate("p", "x", "y").unwrap();
    node.voting_service().cast_vote("p", "y", 1).unwrap();
    let manager = node.snapshot_manager();
    let snap = manager.create_snapshot(&p, SnapshotKind::Manual).unwrap();

    voting.clear_proposal(&p).unwrap();
    assert!(voting.get_all_participants(&p).unwrap().is_empty());

    manager.restore_from_snapshot(&p, Some(snap.id)).unwrap();
    assert_eq!(voting.get_vote(&p, &WalletAddress::new("y")).unwrap(), Some(1));
    assert_eq!(
        voting.get_delegation(&p, &WalletAddress::new("x")).unwrap(),
        Some(WalletAddress::new("y"))
    );
    assert!(manager.verify_proposal_data(&p).unwrap().is_clean());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// However many hourly snapshots are taken, at most `keep` survive, and
    /// they are the newest ones. Manual snapshots are never pruned.
    #[test]
    fn hourly_retention_keeps_newest(hourly in 1usize..30, manual in 0usize..4, keep in 1usize..12) {
        let (_dir, env) = temp_env();
        let clock = Arc::new(NullClock::new(NOW));
        let voting = Arc::new(NullVotingStore::new(clock.clone()));
        let store = Arc::new(env.snapshot_store());
        let manager = SnapshotManager::new(
            voting.clone(),
            store.clone(),
            Arc::new(env.proposal_store()),
            clock.clone(),
        )
        .with_hourly_retained(keep);
        let p = ProposalId::new("p");
        voting.cast_vote(&p, &WalletAddress::new("a"), 1).unwrap();

        for _ in 0..manual {
            manager.create_snapshot(&p, SnapshotKind::Manual).unwrap();
        }
        let mut ids = Vec::new();
        for _ in 0..hourly {
            clock.advance(3600);
            ids.push(manager.create_snapshot(&p, SnapshotKind::Hourly).unwrap().id);
        }

        let listed = store.list_snapshots(&p).unwrap();
        let kept: Vec<_> = listed
            .iter()
            .filter(|s| s.kind == SnapshotKind::Hourly)
            .map(|s| s.id)
            .collect();
        let expected: Vec<_> = ids.iter().rev().take(keep).copied().collect();
        prop_assert_eq!(kept, expected);
        prop_assert_eq!(listed.len() - hourly.min(keep), manual);
    }
}

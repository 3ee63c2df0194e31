//! End-to-end delegation scenarios against the in-memory stores.

use std::sync::Arc;

use liquid_governance::{
    CycleReason, DelegationResolver, GovernanceError, TallyEngine, VotingService,
};
use liquid_nullables::{NullAuditStore, NullClock, NullProposalStore, NullVotingStore};
use liquid_store::{AuditStore, ProposalStore, VotingStore};
use liquid_types::{Proposal, ProposalId, ProposalOption, Timestamp, WalletAddress};

struct World {
    clock: Arc<NullClock>,
    store: Arc<NullVotingStore>,
    audit: NullAuditStore,
    proposals: Arc<NullProposalStore>,
    service: VotingService,
    p: ProposalId,
}

fn world() -> World {
    let clock = Arc::new(NullClock::new(1_000));
    let store = Arc::new(NullVotingStore::new(clock.clone()));
    let proposals = Arc::new(NullProposalStore::new());
    let p = ProposalId::new("scenario");
    proposals
        .put_proposal(&Proposal {
            id: p.clone(),
            organization_id: "org".into(),
            options: vec![
                ProposalOption { number: 1, text: "one".into() },
                ProposalOption { number: 2, text: "two".into() },
            ],
            deadline: Timestamp::new(2_000),
        })
        .unwrap();
    let service = VotingService::new(store.clone(), proposals.clone(), clock.clone());
    World {
        clock,
        store,
        audit: NullAuditStore::new(),
        proposals,
        service,
        p,
    }
}

fn w(name: &str) -> WalletAddress {
    WalletAddress::new(name)
}

#[test]
fn chain_of_two_feeds_a_direct_voter() {
    let world = world();
    world.service.delegate("scenario", "A", "B").unwrap();
    world.service.delegate("scenario", "B", "C").unwrap();
    world.service.cast_vote("scenario", "C", 1).unwrap();
    world.service.cast_vote("scenario", "D", 2).unwrap();
    world.clock.set(2_000);

    let resolution = DelegationResolver::default()
        .resolve_proposal(world.store.as_ref(), &world.audit, world.clock.as_ref(), &world.p)
        .unwrap();
    let sinks: Vec<_> = resolution
        .delegations
        .iter()
        .map(|d| (d.delegator.clone(), d.final_delegate.clone()))
        .collect();
    assert_eq!(sinks, vec![(w("a"), w("c")), (w("b"), w("c"))]);
    assert_eq!(resolution.voting_power[&w("c")], 3);
    assert_eq!(resolution.voting_power[&w("d")], 1);

    let tally = TallyEngine::new()
        .tally_proposal(
            world.store.as_ref(),
            &world.audit,
            world.proposals.as_ref(),
            world.clock.as_ref(),
            &world.p,
        )
        .unwrap();
    assert_eq!(tally.option_tallies[&1], 3);
    assert_eq!(tally.option_tallies[&2], 1);
    assert_eq!(tally.winning_option, Some(1));
    assert_eq!(world.audit.get_tally_summary(&world.p).unwrap().unwrap().winning_option, Some(1));
}

#[test]
fn reverse_edge_is_rejected() {
    let world = world();
    world.service.delegate("scenario", "A", "B").unwrap();
    match world.service.delegate("scenario", "B", "A") {
        Err(GovernanceError::Cycle(cycle)) => {
            assert_eq!(cycle.reason, CycleReason::ClosesLoop);
            assert_eq!(cycle.path, vec![w("b"), w("a")]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert_eq!(world.store.get_all_delegations(&world.p).unwrap().len(), 1);
}

#[test]
fn sink_that_never_votes_swallows_power() {
    let world = world();
    world.service.delegate("scenario", "X", "Y").unwrap();
    world.service.cast_vote("scenario", "Z", 1).unwrap();
    world.clock.set(2_000);

    DelegationResolver::default()
        .resolve_proposal(world.store.as_ref(), &world.audit, world.clock.as_ref(), &world.p)
        .unwrap();
    let tally = TallyEngine::new()
        .tally_proposal(
            world.store.as_ref(),
            &world.audit,
            world.proposals.as_ref(),
            world.clock.as_ref(),
            &world.p,
        )
        .unwrap();
    assert!(tally.total_voting_power > tally.total_cast_power);
    assert_eq!(tally.option_tallies.values().sum::<u64>(), 1);
}

#[test]
fn edge_into_unrelated_corrupt_loop_is_accepted() {
    let world = world();
    // Corrupt state: a loop written behind the detector's back.
    world.store.inject_delegation(&world.p, &w("x"), &w("y"));
    world.store.inject_delegation(&world.p, &w("y"), &w("x"));
    world.service.delegate("scenario", "A", "X").unwrap();
    assert_eq!(world.store.get_delegation(&world.p, &w("a")).unwrap(), Some(w("x")));
}

//! Delegation resolver: turns the delegation graph into voting power.
//!
//! Every delegator's chain is followed independently until it reaches a sink
//! (a wallet with no outgoing delegation). Each participant then contributes
//! exactly one unit of power: delegators to their sink, everyone else to
//! themselves. A sink that never voted keeps the power it accumulated; that
//! power is not redistributed and simply never reaches an option.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

use liquid_store::{AuditStore, StoreError, VotingStore};
use liquid_types::{
    AuditStatus, Clock, ErrorEntry, OptionNumber, ProcessingStage, ProposalId, ResolutionRecord,
    ResolvedDelegation, Timestamp, WalletAddress,
};

use crate::cycle::MAX_DELEGATION_HOPS;
use crate::GovernanceError;

/// Pure output of a resolution pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub delegations: Vec<ResolvedDelegation>,
    pub voting_power: BTreeMap<WalletAddress, u64>,
    pub total_participants: u64,
    pub total_delegators: u64,
    pub direct_voters: u64,
    pub longest_chain: usize,
}

impl Resolution {
    pub fn total_power(&self) -> u64 {
        self.voting_power.values().sum()
    }

    pub fn final_delegate(&self, delegator: &WalletAddress) -> Option<&WalletAddress> {
        self.delegations
            .iter()
            .find(|d| &d.delegator == delegator)
            .map(|d| &d.final_delegate)
    }
}

/// Resolves delegation chains to sinks.
#[derive(Clone, Copy, Debug)]
pub struct DelegationResolver {
    max_hops: usize,
}

impl DelegationResolver {
    pub fn new(max_hops: usize) -> Self {
        Self { max_hops }
    }

    /// Follow `from`'s chain to its sink.
    ///
    /// Stops early on a revisit or at the hop limit (cycles are rejected at
    /// write time, so either means corrupted state); the last wallet reached is
    /// then used as the sink and the entry is marked `truncated`.
    pub fn resolve_chain(
        &self,
        delegations: &BTreeMap<WalletAddress, WalletAddress>,
        from: &WalletAddress,
    ) -> ResolvedDelegation {
        let mut path = vec![from.clone()];
        let mut visited = HashSet::from([from.clone()]);
        let mut current = from.clone();
        let mut truncated = false;
        while let Some(next) = delegations.get(&current) {
            if path.len() > self.max_hops || !visited.insert(next.clone()) {
                truncated = true;
                break;
            }
            path.push(next.clone());
            current = next.clone();
        }
        let path_length = path.len() - 1;
        ResolvedDelegation {
            delegator: from.clone(),
            final_delegate: current,
            path,
            path_length,
            truncated,
        }
    }

    /// Resolve every delegator and compute voting power.
    ///
    /// Power is handed out over the union of the participant set, delegators
    /// and voters, so a wallet missing from the participant set after a lost
    /// race still counts exactly once.
    pub fn resolve(
        &self,
        delegations: &BTreeMap<WalletAddress, WalletAddress>,
        participants: &BTreeSet<WalletAddress>,
        votes: &BTreeMap<WalletAddress, OptionNumber>,
    ) -> Resolution {
        let mut resolution = Resolution::default();

        for delegator in delegations.keys() {
            let resolved = self.resolve_chain(delegations, delegator);
            if resolved.truncated {
                tracing::warn!(
                    delegator = %delegator,
                    stopped_at = %resolved.final_delegate,
                    hops = resolved.path_length,
                    "delegation walk stopped on a revisit or the hop limit"
                );
            }
            resolution.longest_chain = resolution.longest_chain.max(resolved.path_length);
            *resolution
                .voting_power
                .entry(resolved.final_delegate.clone())
                .or_insert(0) += 1;
            resolution.delegations.push(resolved);
        }
        resolution.total_delegators = delegations.len() as u64;

        let everyone: BTreeSet<&WalletAddress> = participants
            .iter()
            .chain(delegations.keys())
            .chain(votes.keys())
            .collect();
        for wallet in &everyone {
            if delegations.contains_key(*wallet) {
                continue;
            }
            if votes.contains_key(*wallet) {
                resolution.direct_voters += 1;
            } else {
                tracing::debug!(wallet = %wallet, "participant with neither vote nor delegation");
            }
            *resolution.voting_power.entry((*wallet).clone()).or_insert(0) += 1;
        }
        resolution.total_participants = everyone.len() as u64;

        resolution
    }

    /// Read the proposal's live state, resolve it, and persist the
    /// resolution record (`completed`, or `error` with the failure reason).
    ///
    /// A failed audit write is logged and swallowed; the computed record is
    /// still returned.
    pub fn resolve_proposal(
        &self,
        store: &dyn VotingStore,
        audit: &dyn AuditStore,
        clock: &dyn Clock,
        proposal: &ProposalId,
    ) -> Result<ResolutionRecord, GovernanceError> {
        let started = Instant::now();
        tracing::info!(proposal = %proposal, "resolving delegations");

        let outcome = (|| -> Result<Resolution, GovernanceError> {
            let delegations = store.get_all_delegations(proposal)?;
            let participants = store.get_all_participants(proposal)?;
            let votes = store.get_all_votes(proposal)?;
            Ok(self.resolve(&delegations, &participants, &votes))
        })();
        let computation_ms = started.elapsed().as_millis() as u64;
        let now = clock.now();

        match outcome {
            Ok(resolution) => {
                let record = ResolutionRecord {
                    proposal_id: proposal.clone(),
                    status: AuditStatus::Completed,
                    delegations: resolution.delegations,
                    voting_power: resolution.voting_power,
                    total_participants: resolution.total_participants,
                    total_delegators: resolution.total_delegators,
                    direct_voters: resolution.direct_voters,
                    longest_chain: resolution.longest_chain,
                    error: None,
                    computation_ms,
                    resolved_at: now,
                };
                swallow_persistence(proposal, "resolution record", audit.save_resolution(&record));
                tracing::info!(
                    proposal = %proposal,
                    participants = record.total_participants,
                    delegators = record.total_delegators,
                    direct_voters = record.direct_voters,
                    longest_chain = record.longest_chain,
                    elapsed_ms = computation_ms,
                    "delegations resolved"
                );
                Ok(record)
            }
            Err(err) => {
                tracing::error!(proposal = %proposal, error = %err, elapsed_ms = computation_ms, "resolution failed");
                record_resolution_failure(audit, proposal, &err, computation_ms, now);
                Err(err)
            }
        }
    }
}

impl Default for DelegationResolver {
    fn default() -> Self {
        Self::new(MAX_DELEGATION_HOPS)
    }
}

/// Persist a failed resolution: an `error` resolution record carrying the
/// reason and computation time, plus an error entry.
pub fn record_resolution_failure(
    audit: &dyn AuditStore,
    proposal: &ProposalId,
    err: &GovernanceError,
    computation_ms: u64,
    at: Timestamp,
) {
    let record = ResolutionRecord::failed(proposal.clone(), err.to_string(), computation_ms, at);
    swallow_persistence(proposal, "resolution error record", audit.save_resolution(&record));
    record_error(audit, proposal, ProcessingStage::Resolution, err, at);
}

/// Append an error record, logging (not propagating) a failed write.
pub fn record_error(
    audit: &dyn AuditStore,
    proposal: &ProposalId,
    stage: ProcessingStage,
    err: &GovernanceError,
    at: Timestamp,
) {
    let entry = ErrorEntry {
        proposal_id: proposal.clone(),
        stage,
        kind: err.kind_label().to_string(),
        message: err.to_string(),
        at,
    };
    swallow_persistence(proposal, "error record", audit.record_error(&entry));
}

/// Log a failed audit write as [`GovernanceError::Persistence`] and carry on.
/// Returns the logged error, if any.
pub fn swallow_persistence(
    proposal: &ProposalId,
    what: &str,
    result: Result<(), StoreError>,
) -> Option<GovernanceError> {
    let err = GovernanceError::persistence(what, result.err()?);
    tracing::error!(
        proposal = %proposal,
        kind = err.kind_label(),
        error = %err,
        "audit write failed; continuing"
    );
    Some(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquid_nullables::{NullAuditStore, NullClock, NullVotingStore};
    use std::sync::Arc;

    fn w(name: &str) -> WalletAddress {
        WalletAddress::new(name)
    }

    fn delegations(edges: &[(&str, &str)]) -> BTreeMap<WalletAddress, WalletAddress> {
        edges.iter().map(|(a, b)| (w(a), w(b))).collect()
    }

    fn votes(v: &[(&str, u32)]) -> BTreeMap<WalletAddress, u32> {
        v.iter().map(|(a, o)| (w(a), *o)).collect()
    }

    fn participants(
        d: &BTreeMap<WalletAddress, WalletAddress>,
        v: &BTreeMap<WalletAddress, u32>,
    ) -> BTreeSet<WalletAddress> {
        d.keys().chain(v.keys()).cloned().collect()
    }

    // ── Transitive resolution ────────────────────────────────────────────

    #[test]
    fn chain_resolves_to_sink_and_counts_power() {
        let d = delegations(&[("a", "b"), ("b", "c")]);
        let v = votes(&[("c", 1), ("d", 2)]);
        let r = DelegationResolver::default().resolve(&d, &participants(&d, &v), &v);

        assert_eq!(r.final_delegate(&w("a")), Some(&w("c")));
        assert_eq!(r.final_delegate(&w("b")), Some(&w("c")));
        assert_eq!(r.voting_power[&w("c")], 3);
        assert_eq!(r.voting_power[&w("d")], 1);
        assert_eq!(r.longest_chain, 2);
        assert_eq!(r.direct_voters, 2);
        assert_eq!(r.total_power(), 4);
    }

    #[test]
    fn path_is_recorded_from_delegator_to_sink() {
        let d = delegations(&[("a", "b"), ("b", "c")]);
        let resolved = DelegationResolver::default().resolve_chain(&d, &w("a"));
        assert_eq!(resolved.path, vec![w("a"), w("b"), w("c")]);
        assert_eq!(resolved.path_length, 2);
        assert!(!resolved.truncated);
    }

    #[test]
    fn non_voting_sink_keeps_power() {
        let d = delegations(&[("x", "y")]);
        let v = votes(&[("z", 1)]);
        let mut p = participants(&d, &v);
        p.insert(w("y"));
        let r = DelegationResolver::default().resolve(&d, &p, &v);
        assert_eq!(r.voting_power[&w("y")], 2);
        assert_eq!(r.total_power(), r.total_participants);
    }

    #[test]
    fn sink_outside_participant_set_still_receives_power() {
        let d = delegations(&[("x", "outsider")]);
        let v = votes(&[]);
        let r = DelegationResolver::default().resolve(&d, &participants(&d, &v), &v);
        assert_eq!(r.voting_power[&w("outsider")], 1);
        assert_eq!(r.total_participants, 1);
        assert_eq!(r.total_power(), 1);
    }

    #[test]
    fn corrupted_loop_is_truncated_not_infinite() {
        let d = delegations(&[("a", "b"), ("b", "a")]);
        let v = votes(&[]);
        let r = DelegationResolver::default().resolve(&d, &participants(&d, &v), &v);
        assert!(r.delegations.iter().all(|d| d.truncated));
        assert_eq!(r.total_power(), 2);
    }

    #[test]
    fn hop_limit_caps_path_length() {
        let edges: Vec<(String, String)> =
            (0..20).map(|i| (format!("w{i}"), format!("w{}", i + 1))).collect();
        let d: BTreeMap<_, _> = edges.iter().map(|(a, b)| (w(a), w(b))).collect();
        let resolved = DelegationResolver::new(5).resolve_chain(&d, &w("w0"));
        assert_eq!(resolved.path_length, 5);
        assert!(resolved.truncated);
    }

    // ── Store-backed resolution ──────────────────────────────────────────

    #[test]
    fn resolve_proposal_persists_completed_record() {
        let clock = Arc::new(NullClock::new(500));
        let store = NullVotingStore::new(clock.clone());
        let audit = NullAuditStore::new();
        let p = ProposalId::new("p1");
        store.set_delegation(&p, &w("a"), &w("b")).unwrap();
        store.cast_vote(&p, &w("b"), 1).unwrap();

        let record = DelegationResolver::default()
            .resolve_proposal(&store, &audit, clock.as_ref(), &p)
            .unwrap();
        assert!(record.is_completed());
        assert_eq!(record.voting_power[&w("b")], 2);
        assert_eq!(audit.get_resolution(&p).unwrap(), Some(record));
    }

    #[test]
    fn store_outage_records_error_status() {
        let clock = Arc::new(NullClock::new(500));
        let store = NullVotingStore::new(clock.clone());
        let audit = NullAuditStore::new();
        let p = ProposalId::new("p1");
        store.set_unavailable(true);

        let err = DelegationResolver::default()
            .resolve_proposal(&store, &audit, clock.as_ref(), &p)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::StoreUnavailable(_)));

        let saved = audit.get_resolution(&p).unwrap().unwrap();
        assert_eq!(saved.status, AuditStatus::Error);
        assert!(saved.voting_power.is_empty());
        assert_eq!(audit.list_errors(&p).unwrap()[0].kind, "store_unavailable");
    }

    #[test]
    fn failed_audit_write_does_not_fail_resolution() {
        let clock = Arc::new(NullClock::new(500));
        let store = NullVotingStore::new(clock.clone());
        let audit = NullAuditStore::new();
        audit.set_fail_writes(true);
        let p = ProposalId::new("p1");
        store.cast_vote(&p, &w("a"), 1).unwrap();

        let record = DelegationResolver::default()
            .resolve_proposal(&store, &audit, clock.as_ref(), &p)
            .unwrap();
        assert!(record.is_completed());
        assert_eq!(audit.get_resolution(&p).unwrap(), None);
    }

    #[test]
    fn swallowed_write_is_labelled_persistence() {
        let p = ProposalId::new("p1");
        assert!(swallow_persistence(&p, "tally record", Ok(())).is_none());

        let err = swallow_persistence(
            &p,
            "tally record",
            Err(StoreError::Backend("disk full".into())),
        )
        .unwrap();
        assert!(matches!(err, GovernanceError::Persistence(_)));
        assert_eq!(err.kind_label(), "persistence");
        assert!(err.to_string().contains("tally record"));
    }

    #[test]
    fn resolution_failure_writes_error_record_and_entry() {
        let audit = NullAuditStore::new();
        let p = ProposalId::new("p1");
        let err = GovernanceError::StoreUnavailable("down".into());
        record_resolution_failure(&audit, &p, &err, 7, Timestamp::new(42));

        let saved = audit.get_resolution(&p).unwrap().unwrap();
        assert_eq!(saved.status, AuditStatus::Error);
        assert_eq!(saved.computation_ms, 7);
        assert_eq!(audit.list_errors(&p).unwrap()[0].kind, "store_unavailable");
    }
}

//! Tally engine: weights cast votes by resolved voting power.

use std::collections::BTreeMap;
use std::time::Instant;

use liquid_store::{AuditStore, ProposalStore, VotingStore};
use liquid_types::{
    AuditStatus, Clock, OptionNumber, ProcessingStage, ProposalId, TallyRecord, VoteBreakdown,
    WalletAddress,
};

use crate::resolver::{record_error, swallow_persistence};
use crate::GovernanceError;

/// Pure output of a tally pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TallyOutcome {
    pub option_tallies: BTreeMap<OptionNumber, u64>,
    pub breakdown: Vec<VoteBreakdown>,
    pub total_voting_power: u64,
    pub total_cast_power: u64,
    pub unique_voters: u64,
    pub winning_option: Option<OptionNumber>,
    /// Votes for options the proposal never declared. Not counted.
    pub ignored_votes: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TallyEngine;

impl TallyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Weight every cast vote by its wallet's voting power.
    ///
    /// A voter absent from the power map (it voted after resolution ran)
    /// counts with power 1.
    pub fn tally(
        &self,
        options: impl IntoIterator<Item = OptionNumber>,
        voting_power: &BTreeMap<WalletAddress, u64>,
        votes: &BTreeMap<WalletAddress, OptionNumber>,
    ) -> TallyOutcome {
        let mut outcome = TallyOutcome {
            option_tallies: options.into_iter().map(|o| (o, 0)).collect(),
            total_voting_power: voting_power.values().sum(),
            ..TallyOutcome::default()
        };

        for (wallet, option) in votes {
            let Some(tally) = outcome.option_tallies.get_mut(option) else {
                tracing::warn!(wallet = %wallet, option, "vote for undeclared option ignored");
                outcome.ignored_votes += 1;
                continue;
            };
            let power = voting_power.get(wallet).copied().unwrap_or(1);
            *tally += power;
            outcome.total_cast_power += power;
            outcome.unique_voters += 1;
            outcome.breakdown.push(VoteBreakdown {
                wallet: wallet.clone(),
                option: *option,
                power,
            });
        }

        outcome.winning_option = Self::winner(&outcome.option_tallies);
        outcome
    }

    /// The option with strictly the highest tally. `None` on a tie at the
    /// maximum or when the maximum is zero.
    pub fn winner(tallies: &BTreeMap<OptionNumber, u64>) -> Option<OptionNumber> {
        let max = tallies.values().copied().max().filter(|m| *m > 0)?;
        let mut leaders = tallies.iter().filter(|(_, t)| **t == max);
        let (option, _) = leaders.next()?;
        if leaders.next().is_some() {
            None
        } else {
            Some(*option)
        }
    }

    /// Tally a proposal against its stored resolution record and persist the
    /// tally record.
    ///
    /// Aborts with [`GovernanceError::NoResolution`] before computing anything
    /// if the resolution is missing or not `completed`. Any later failure is
    /// persisted as an `error` record with zeroed totals.
    pub fn tally_proposal(
        &self,
        store: &dyn VotingStore,
        audit: &dyn AuditStore,
        proposals: &dyn ProposalStore,
        clock: &dyn Clock,
        proposal: &ProposalId,
    ) -> Result<TallyRecord, GovernanceError> {
        let started = Instant::now();

        let resolution = match audit.get_resolution(proposal) {
            Ok(Some(r)) if r.is_completed() => r,
            Ok(_) => {
                let err = GovernanceError::NoResolution(proposal.clone());
                tracing::warn!(proposal = %proposal, "tally skipped: no completed resolution");
                record_error(audit, proposal, ProcessingStage::Tally, &err, clock.now());
                return Err(err);
            }
            Err(e) => {
                let err = GovernanceError::from(e);
                record_error(audit, proposal, ProcessingStage::Tally, &err, clock.now());
                return Err(err);
            }
        };

        tracing::info!(proposal = %proposal, "tallying votes");
        let outcome = (|| -> Result<TallyOutcome, GovernanceError> {
            let definition = proposals
                .get_proposal(proposal)?
                .ok_or_else(|| GovernanceError::ProposalNotFound(proposal.clone()))?;
            let votes = store.get_all_votes(proposal)?;
            Ok(self.tally(definition.option_numbers(), &resolution.voting_power, &votes))
        })();
        let computation_ms = started.elapsed().as_millis() as u64;
        let now = clock.now();

        match outcome {
            Ok(outcome) => {
                let record = TallyRecord {
                    proposal_id: proposal.clone(),
                    status: AuditStatus::Completed,
                    option_tallies: outcome.option_tallies,
                    breakdown: outcome.breakdown,
                    total_voting_power: outcome.total_voting_power,
                    total_cast_power: outcome.total_cast_power,
                    unique_voters: outcome.unique_voters,
                    winning_option: outcome.winning_option,
                    error: None,
                    computation_ms,
                    tallied_at: now,
                };
                swallow_persistence(proposal, "tally record", audit.save_tally(&record));
                tracing::info!(
                    proposal = %proposal,
                    total_power = record.total_voting_power,
                    cast_power = record.total_cast_power,
                    voters = record.unique_voters,
                    winner = ?record.winning_option,
                    elapsed_ms = computation_ms,
                    "tally completed"
                );
                Ok(record)
            }
            Err(err) => {
                tracing::error!(proposal = %proposal, error = %err, "tally failed");
                let record =
                    TallyRecord::failed(proposal.clone(), err.to_string(), computation_ms, now);
                swallow_persistence(proposal, "tally error record", audit.save_tally(&record));
                record_error(audit, proposal, ProcessingStage::Tally, &err, now);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquid_nullables::{NullAuditStore, NullClock, NullProposalStore, NullVotingStore};
    use liquid_types::{Proposal, ProposalOption, ResolutionRecord, Timestamp};
    use std::sync::Arc;

    fn w(name: &str) -> WalletAddress {
        WalletAddress::new(name)
    }

    fn power(p: &[(&str, u64)]) -> BTreeMap<WalletAddress, u64> {
        p.iter().map(|(a, n)| (w(a), *n)).collect()
    }

    fn votes(v: &[(&str, u32)]) -> BTreeMap<WalletAddress, u32> {
        v.iter().map(|(a, o)| (w(a), *o)).collect()
    }

    #[test]
    fn weighted_tally_picks_winner() {
        let out = TallyEngine::new().tally(
            [1, 2],
            &power(&[("c", 3), ("d", 1)]),
            &votes(&[("c", 1), ("d", 2)]),
        );
        assert_eq!(out.option_tallies[&1], 3);
        assert_eq!(out.option_tallies[&2], 1);
        assert_eq!(out.winning_option, Some(1));
        assert_eq!(out.total_voting_power, 4);
        assert_eq!(out.total_cast_power, 4);
        assert_eq!(out.unique_voters, 2);
    }

    #[test]
    fn tie_at_max_has_no_winner() {
        let out = TallyEngine::new().tally(
            [1, 2, 3],
            &power(&[("a", 2), ("b", 2), ("c", 1)]),
            &votes(&[("a", 1), ("b", 2), ("c", 3)]),
        );
        assert_eq!(out.winning_option, None);
    }

    #[test]
    fn all_zero_has_no_winner() {
        let out = TallyEngine::new().tally([1, 2], &BTreeMap::new(), &BTreeMap::new());
        assert_eq!(out.option_tallies.len(), 2);
        assert_eq!(out.winning_option, None);
    }

    #[test]
    fn late_voter_defaults_to_power_one() {
        let out = TallyEngine::new().tally([1], &power(&[("a", 1)]), &votes(&[("late", 1)]));
        assert_eq!(out.option_tallies[&1], 1);
        assert_eq!(out.breakdown[0].power, 1);
    }

    #[test]
    fn non_voting_sink_power_is_not_cast() {
        let out = TallyEngine::new().tally(
            [1],
            &power(&[("y", 2), ("z", 1)]),
            &votes(&[("z", 1)]),
        );
        assert_eq!(out.total_voting_power, 3);
        assert_eq!(out.total_cast_power, 1);
        assert_eq!(out.option_tallies[&1], 1);
    }

    #[test]
    fn undeclared_option_is_ignored() {
        let out = TallyEngine::new().tally([1], &power(&[("a", 1), ("b", 1)]), &votes(&[("a", 1), ("b", 9)]));
        assert_eq!(out.ignored_votes, 1);
        assert_eq!(out.unique_voters, 1);
        assert!(!out.option_tallies.contains_key(&9));
    }

    fn fixtures() -> (Arc<NullClock>, NullVotingStore, NullAuditStore, NullProposalStore, ProposalId) {
        let clock = Arc::new(NullClock::new(1_000));
        let store = NullVotingStore::new(clock.clone());
        let audit = NullAuditStore::new();
        let proposals = NullProposalStore::new();
        let p = ProposalId::new("p1");
        proposals
            .put_proposal(&Proposal {
                id: p.clone(),
                organization_id: "org".into(),
                options: vec![
                    ProposalOption { number: 1, text: "yes".into() },
                    ProposalOption { number: 2, text: "no".into() },
                ],
                deadline: Timestamp::new(900),
            })
            .unwrap();
        (clock, store, audit, proposals, p)
    }

    #[test]
    fn tally_without_resolution_aborts() {
        let (clock, store, audit, proposals, p) = fixtures();
        let err = TallyEngine::new()
            .tally_proposal(&store, &audit, &proposals, clock.as_ref(), &p)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::NoResolution(_)));
        assert_eq!(audit.get_tally(&p).unwrap(), None);
        assert_eq!(audit.list_errors(&p).unwrap()[0].kind, "no_resolution");
    }

    #[test]
    fn tally_against_error_resolution_aborts() {
        let (clock, store, audit, proposals, p) = fixtures();
        audit
            .save_resolution(&ResolutionRecord::failed(p.clone(), "boom", 1, Timestamp::new(1)))
            .unwrap();
        let err = TallyEngine::new()
            .tally_proposal(&store, &audit, &proposals, clock.as_ref(), &p)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::NoResolution(_)));
    }

    #[test]
    fn store_outage_persists_zeroed_error_record() {
        let (clock, store, audit, proposals, p) = fixtures();
        let mut resolution = ResolutionRecord::failed(p.clone(), "", 0, Timestamp::new(1));
        resolution.status = AuditStatus::Completed;
        resolution.error = None;
        audit.save_resolution(&resolution).unwrap();
        store.set_unavailable(true);

        let err = TallyEngine::new()
            .tally_proposal(&store, &audit, &proposals, clock.as_ref(), &p)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::StoreUnavailable(_)));
        let saved = audit.get_tally(&p).unwrap().unwrap();
        assert_eq!(saved.status, AuditStatus::Error);
        assert_eq!(saved.total_voting_power, 0);
        // The resolution stays valid.
        assert!(audit.get_resolution(&p).unwrap().unwrap().is_completed());
    }
}

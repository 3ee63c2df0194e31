//! Delegation cycle detection.
//!
//! Run before every delegation write. The candidate edge `delegator → target`
//! is treated as already inserted, and the chain is walked forward from
//! `target`. Reaching `delegator` again means the edge would close a loop.
//!
//! Pre-existing loops that do not pass through `delegator` are tolerated: the
//! walk stops as soon as it revisits a wallet and reports no cycle for the
//! new edge. Such loops should be structurally impossible, so they are logged
//! loudly but do not block unrelated delegations.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use liquid_store::{StoreError, VotingStore};
use liquid_types::{ProposalId, WalletAddress};

/// Hop limit for both detection and resolution walks.
pub const MAX_DELEGATION_HOPS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleReason {
    SelfDelegation,
    ClosesLoop,
    /// The walk ran past the hop limit. Reported as a cycle to fail safe.
    ChainTooLong,
}

/// A rejected delegation: the wallets walked, starting at the delegator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cycle {
    pub path: Vec<WalletAddress>,
    pub reason: CycleReason,
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self
            .path
            .iter()
            .map(WalletAddress::as_str)
            .collect::<Vec<_>>()
            .join(" -> ");
        match self.reason {
            CycleReason::SelfDelegation => write!(f, "cannot delegate to self ({path})"),
            CycleReason::ClosesLoop => write!(f, "would create a delegation cycle: {path}"),
            CycleReason::ChainTooLong => write!(
                f,
                "delegation chain too long (more than {} hops): {path}",
                self.path.len().saturating_sub(1)
            ),
        }
    }
}

/// Checks candidate delegation edges against a delegation graph.
#[derive(Clone, Copy, Debug)]
pub struct CycleDetector {
    max_hops: usize,
}

impl CycleDetector {
    pub fn new(max_hops: usize) -> Self {
        Self { max_hops }
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Check whether adding `delegator → target` to `graph` would create a cycle.
    pub fn check(
        &self,
        graph: &BTreeMap<WalletAddress, WalletAddress>,
        delegator: &WalletAddress,
        target: &WalletAddress,
    ) -> Result<(), Cycle> {
        if delegator == target {
            return Err(Cycle {
                path: vec![delegator.clone(), target.clone()],
                reason: CycleReason::SelfDelegation,
            });
        }

        let mut path = vec![delegator.clone()];
        let mut visited = HashSet::new();
        let mut current = target.clone();
        for _ in 0..self.max_hops {
            if &current == delegator {
                return Err(Cycle {
                    path,
                    reason: CycleReason::ClosesLoop,
                });
            }
            if !visited.insert(current.clone()) {
                tracing::warn!(
                    delegator = %delegator,
                    target = %target,
                    revisited = %current,
                    "pre-existing delegation loop found while checking new edge; allowing it"
                );
                return Ok(());
            }
            path.push(current.clone());
            match graph.get(&current) {
                Some(next) => current = next.clone(),
                None => return Ok(()),
            }
        }
        Err(Cycle {
            path,
            reason: CycleReason::ChainTooLong,
        })
    }

    /// Run [`CycleDetector::check`] against the live delegation map of a proposal.
    pub fn check_in_store(
        &self,
        store: &dyn VotingStore,
        proposal: &ProposalId,
        delegator: &WalletAddress,
        target: &WalletAddress,
    ) -> Result<Result<(), Cycle>, StoreError> {
        if delegator == target {
            return Ok(self.check(&BTreeMap::new(), delegator, target));
        }
        let graph = store.get_all_delegations(proposal)?;
        Ok(self.check(&graph, delegator, target))
    }
}

impl Default for CycleDetector {
    fn default() -> Self {
        Self::new(MAX_DELEGATION_HOPS)
    }
}

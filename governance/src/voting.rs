//! Guarded vote / delegate mutations.
//!
//! Wraps the raw [`VotingStore`] contract with the checks a caller must run
//! first: input validation, proposal open, option declared, cycle detection
//! and the per-(wallet, proposal) cooldown. Mutations of one proposal are
//! serialized within this process, so the store's multi-key sequences never
//! interleave locally. Other processes writing the same store can still race;
//! the cooldown and periodic integrity checks cover that.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use liquid_store::{keys, ProposalStore, VotingStore};
use liquid_types::{Clock, InputError, OptionNumber, Proposal, ProposalId, WalletAddress};

use crate::cycle::CycleDetector;
use crate::GovernanceError;

/// Status written to the ephemeral store while a proposal accepts votes.
pub const STATUS_ACTIVE: &str = "active";

pub struct VotingService {
    store: Arc<dyn VotingStore>,
    proposals: Arc<dyn ProposalStore>,
    clock: Arc<dyn Clock>,
    detector: CycleDetector,
    cooldown_secs: u64,
    /// Held only while a mutation runs; dead entries are pruned on lookup.
    proposal_locks: Mutex<HashMap<ProposalId, Weak<Mutex<()>>>>,
}

impl VotingService {
    pub fn new(
        store: Arc<dyn VotingStore>,
        proposals: Arc<dyn ProposalStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            proposals,
            clock,
            detector: CycleDetector::default(),
            cooldown_secs: keys::COOLDOWN_SECS,
            proposal_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn with_detector(mut self, detector: CycleDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Cast (or change) a direct vote. Clears any delegation the wallet held.
    pub fn cast_vote(
        &self,
        proposal: &str,
        wallet: &str,
        option: OptionNumber,
    ) -> Result<(), GovernanceError> {
        let proposal = self.open_proposal(proposal)?;
        let wallet = WalletAddress::parse(wallet)?;
        if !proposal.has_option(option) {
            return Err(InputError::UnknownOption(option).into());
        }

        let lock = self.proposal_lock(&proposal.id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        self.start_cooldown(&proposal.id, &wallet)?;
        self.ensure_proposal_keys(&proposal)?;
        self.store.cast_vote(&proposal.id, &wallet, option)?;
        tracing::debug!(proposal = %proposal.id, wallet = %wallet, option, "vote cast");
        Ok(())
    }

    /// Delegate `delegator`'s vote to `delegate`. Clears any vote the delegator held.
    ///
    /// Rejected with [`GovernanceError::Cycle`] (and no state change) if the
    /// edge is a self-delegation or would close a loop.
    pub fn delegate(
        &self,
        proposal: &str,
        delegator: &str,
        delegate: &str,
    ) -> Result<(), GovernanceError> {
        let proposal = self.open_proposal(proposal)?;
        let delegator = WalletAddress::parse(delegator)?;
        let delegate = WalletAddress::parse(delegate)?;

        let lock = self.proposal_lock(&proposal.id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(cycle) =
            self.detector
                .check_in_store(self.store.as_ref(), &proposal.id, &delegator, &delegate)?
        {
            tracing::info!(proposal = %proposal.id, delegator = %delegator, reason = %cycle, "delegation rejected");
            return Err(GovernanceError::Cycle(cycle));
        }
        self.start_cooldown(&proposal.id, &delegator)?;
        self.ensure_proposal_keys(&proposal)?;
        self.store
            .set_delegation(&proposal.id, &delegator, &delegate)?;
        tracing::debug!(proposal = %proposal.id, delegator = %delegator, delegate = %delegate, "delegation set");
        Ok(())
    }

    /// Withdraw a direct vote. Returns `false` if there was none.
    pub fn revoke_vote(&self, proposal: &str, wallet: &str) -> Result<bool, GovernanceError> {
        let proposal = self.open_proposal(proposal)?;
        let wallet = WalletAddress::parse(wallet)?;
        let lock = self.proposal_lock(&proposal.id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        self.start_cooldown(&proposal.id, &wallet)?;
        Ok(self.store.remove_vote(&proposal.id, &wallet)?)
    }

    /// Withdraw a delegation. Returns `false` if there was none.
    pub fn revoke_delegation(
        &self,
        proposal: &str,
        delegator: &str,
    ) -> Result<bool, GovernanceError> {
        let proposal = self.open_proposal(proposal)?;
        let delegator = WalletAddress::parse(delegator)?;
        let lock = self.proposal_lock(&proposal.id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        self.start_cooldown(&proposal.id, &delegator)?;
        Ok(self.store.remove_delegation(&proposal.id, &delegator)?)
    }

    fn open_proposal(&self, raw: &str) -> Result<Proposal, GovernanceError> {
        let id = ProposalId::parse(raw)?;
        let proposal = self
            .proposals
            .get_proposal(&id)?
            .ok_or_else(|| GovernanceError::ProposalNotFound(id.clone()))?;
        if !proposal.is_open(self.clock.now()) {
            return Err(GovernanceError::VotingClosed(id));
        }
        Ok(proposal)
    }

    fn start_cooldown(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<(), GovernanceError> {
        if self.cooldown_secs == 0 {
            return Ok(());
        }
        if self
            .store
            .try_start_cooldown(proposal, wallet, self.cooldown_secs)?
        {
            return Ok(());
        }
        let remaining_secs = self
            .store
            .cooldown_remaining(proposal, wallet)?
            .unwrap_or(self.cooldown_secs);
        Err(GovernanceError::Cooldown { remaining_secs })
    }

    /// Seed `status` and `deadline` the first time a proposal sees activity.
    fn ensure_proposal_keys(&self, proposal: &Proposal) -> Result<(), GovernanceError> {
        if self.store.get_deadline(&proposal.id)?.is_none() {
            self.store.set_deadline(&proposal.id, proposal.deadline)?;
        }
        if self.store.get_status(&proposal.id)?.is_none() {
            self.store.set_status(&proposal.id, STATUS_ACTIVE)?;
        }
        Ok(())
    }

    fn proposal_lock(&self, proposal: &ProposalId) -> Arc<Mutex<()>> {
        let mut locks = self
            .proposal_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| lock.strong_count() > 0);
        if let Some(lock) = locks.get(proposal).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(Mutex::new(()));
        locks.insert(proposal.clone(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.proposal_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

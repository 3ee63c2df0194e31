//! Ephemeral voting store contract.
//!
//! Each method is individually atomic. The compound mutations
//! ([`VotingStore::cast_vote`], [`VotingStore::set_delegation`]) are *not*
//! transactional across keys: a concurrent reader may briefly observe a wallet
//! with both a vote and a delegation, or with neither.

use std::collections::{BTreeMap, BTreeSet};

use liquid_types::{OptionNumber, ProposalId, ProposalState, Timestamp, WalletAddress};

use crate::StoreError;

/// A single wallet's current position on a proposal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalletStatus {
    pub vote: Option<OptionNumber>,
    pub delegate: Option<WalletAddress>,
    pub is_participant: bool,
}

impl WalletStatus {
    pub fn has_voted(&self) -> bool {
        self.vote.is_some()
    }

    pub fn has_delegated(&self) -> bool {
        self.delegate.is_some()
    }

    /// Both a vote and a delegation: only possible mid-race or after corruption.
    pub fn is_conflicted(&self) -> bool {
        self.has_voted() && self.has_delegated()
    }
}

/// Per-proposal mutable voting state.
///
/// All wallet keys returned by reads are normalized (see [`WalletAddress::new`]).
pub trait VotingStore: Send + Sync {
    /// Record `wallet`'s vote, add it to the participant set and clear any
    /// delegation it held. Repeating the same call is a no-op.
    fn cast_vote(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
        option: OptionNumber,
    ) -> Result<(), StoreError>;

    /// Record `delegator → delegate`, add the delegator to the participant set
    /// and clear any vote it held. Cycle checks are the caller's job.
    fn set_delegation(
        &self,
        proposal: &ProposalId,
        delegator: &WalletAddress,
        delegate: &WalletAddress,
    ) -> Result<(), StoreError>;

    /// Returns `true` if a vote was removed.
    fn remove_vote(&self, proposal: &ProposalId, wallet: &WalletAddress)
        -> Result<bool, StoreError>;

    /// Returns `true` if a delegation was removed.
    fn remove_delegation(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<bool, StoreError>;

    fn get_vote(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<Option<OptionNumber>, StoreError>;

    fn get_delegation(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<Option<WalletAddress>, StoreError>;

    fn get_all_votes(
        &self,
        proposal: &ProposalId,
    ) -> Result<BTreeMap<WalletAddress, OptionNumber>, StoreError>;

    fn get_all_delegations(
        &self,
        proposal: &ProposalId,
    ) -> Result<BTreeMap<WalletAddress, WalletAddress>, StoreError>;

    fn get_all_participants(
        &self,
        proposal: &ProposalId,
    ) -> Result<BTreeSet<WalletAddress>, StoreError>;

    fn is_participant(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<bool, StoreError>;

    fn get_status(&self, proposal: &ProposalId) -> Result<Option<String>, StoreError>;

    fn set_status(&self, proposal: &ProposalId, status: &str) -> Result<(), StoreError>;

    fn get_deadline(&self, proposal: &ProposalId) -> Result<Option<Timestamp>, StoreError>;

    fn set_deadline(&self, proposal: &ProposalId, deadline: Timestamp) -> Result<(), StoreError>;

    /// Start the per-(wallet, proposal) cooldown unless one is already running.
    /// Returns `false` if the wallet is still cooling down.
    fn try_start_cooldown(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
        secs: u64,
    ) -> Result<bool, StoreError>;

    /// Seconds left on a running cooldown.
    fn cooldown_remaining(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<Option<u64>, StoreError>;

    /// Acquire the proposal's `lock` key for `owner` with a TTL.
    /// Returns `false` if someone else holds it.
    fn try_acquire_lock(
        &self,
        proposal: &ProposalId,
        owner: &str,
        ttl_secs: u64,
    ) -> Result<bool, StoreError>;

    /// Release the lock only if `owner` still holds it.
    fn release_lock(&self, proposal: &ProposalId, owner: &str) -> Result<(), StoreError>;

    /// Delete every per-proposal key.
    fn clear_proposal(&self, proposal: &ProposalId) -> Result<(), StoreError>;

    /// Write a full state back in one best-effort batch. Existing keys are
    /// not cleared first; call [`VotingStore::clear_proposal`] beforehand.
    fn restore_state(&self, proposal: &ProposalId, state: &ProposalState)
        -> Result<(), StoreError>;

    /// Put a retention expiry on every per-proposal key.
    fn expire_proposal(&self, proposal: &ProposalId, ttl_secs: u64) -> Result<(), StoreError>;

    fn wallet_status(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<WalletStatus, StoreError> {
        Ok(WalletStatus {
            vote: self.get_vote(proposal, wallet)?,
            delegate: self.get_delegation(proposal, wallet)?,
            is_participant: self.is_participant(proposal, wallet)?,
        })
    }

    /// Read the whole per-proposal state. Not a consistent snapshot across keys.
    fn capture_state(&self, proposal: &ProposalId) -> Result<ProposalState, StoreError> {
        Ok(ProposalState {
            votes: self.get_all_votes(proposal)?,
            delegations: self.get_all_delegations(proposal)?,
            participants: self.get_all_participants(proposal)?,
            status: self.get_status(proposal)?,
            deadline: self.get_deadline(proposal)?,
        })
    }
}

//! Proposal collaborator contract.

use liquid_types::{Proposal, ProposalId, Timestamp};

use crate::StoreError;

/// Read access to proposal definitions (plus `put` for importing them).
pub trait ProposalStore: Send + Sync {
    fn put_proposal(&self, proposal: &Proposal) -> Result<(), StoreError>;

    fn get_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError>;

    fn list_proposals(&self) -> Result<Vec<Proposal>, StoreError>;

    /// Proposals with `from < deadline <= to`.
    fn proposals_due_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Proposal>, StoreError> {
        Ok(self
            .list_proposals()?
            .into_iter()
            .filter(|p| p.deadline > from && p.deadline <= to)
            .collect())
    }

    /// Proposals with `deadline <= t`.
    fn proposals_due_before(&self, t: Timestamp) -> Result<Vec<Proposal>, StoreError> {
        Ok(self
            .list_proposals()?
            .into_iter()
            .filter(|p| p.deadline <= t)
            .collect())
    }

    /// Proposals still accepting votes at `now`.
    fn open_proposals(&self, now: Timestamp) -> Result<Vec<Proposal>, StoreError> {
        Ok(self
            .list_proposals()?
            .into_iter()
            .filter(|p| p.is_open(now))
            .collect())
    }
}

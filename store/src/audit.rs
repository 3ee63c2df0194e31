//! Durable audit repository for resolution and tally results.

use liquid_types::{ErrorEntry, ProposalId, ResolutionRecord, TallyRecord, TallySummary};

use crate::StoreError;

/// Repository for audit records, keyed by proposal id.
///
/// `save_*` methods are upserts: a second save for the same proposal replaces
/// the first (last write wins).
pub trait AuditStore: Send + Sync {
    fn save_resolution(&self, record: &ResolutionRecord) -> Result<(), StoreError>;

    fn get_resolution(&self, proposal: &ProposalId)
        -> Result<Option<ResolutionRecord>, StoreError>;

    /// Saves the full record and its denormalized summary.
    fn save_tally(&self, record: &TallyRecord) -> Result<(), StoreError>;

    fn get_tally(&self, proposal: &ProposalId) -> Result<Option<TallyRecord>, StoreError>;

    fn get_tally_summary(&self, proposal: &ProposalId)
        -> Result<Option<TallySummary>, StoreError>;

    /// Append an error record.
    fn record_error(&self, entry: &ErrorEntry) -> Result<(), StoreError>;

    /// Error records for a proposal, oldest first.
    fn list_errors(&self, proposal: &ProposalId) -> Result<Vec<ErrorEntry>, StoreError>;

    /// Both resolution and tally exist with status `completed`.
    fn is_fully_completed(&self, proposal: &ProposalId) -> Result<bool, StoreError> {
        let resolved = self
            .get_resolution(proposal)?
            .is_some_and(|r| r.is_completed());
        if !resolved {
            return Ok(false);
        }
        Ok(self
            .get_tally_summary(proposal)?
            .is_some_and(|t| t.status == liquid_types::AuditStatus::Completed))
    }
}

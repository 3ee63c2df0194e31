//! Durable snapshot storage trait.

use liquid_types::{ProposalId, ProposalState, Snapshot, SnapshotId, SnapshotKind, Timestamp};

use crate::StoreError;

/// Trait for storing immutable proposal snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Persist a new snapshot. The store assigns a monotonically increasing id.
    fn put_snapshot(
        &self,
        proposal: &ProposalId,
        kind: SnapshotKind,
        taken_at: Timestamp,
        state: &ProposalState,
    ) -> Result<Snapshot, StoreError>;

    fn get_snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError>;

    /// All snapshots of a proposal, newest first.
    fn list_snapshots(&self, proposal: &ProposalId) -> Result<Vec<Snapshot>, StoreError>;

    /// Returns `true` if a snapshot was deleted.
    fn delete_snapshot(&self, id: SnapshotId) -> Result<bool, StoreError>;

    /// Every proposal with at least one snapshot.
    fn snapshot_proposals(&self) -> Result<Vec<ProposalId>, StoreError>;

    fn latest_snapshot(&self, proposal: &ProposalId) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.list_snapshots(proposal)?.into_iter().next())
    }
}

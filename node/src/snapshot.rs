//! Snapshot / backup manager.
//!
//! Copies a proposal's live ephemeral state (votes, delegations, participants,
//! status, deadline) into the durable snapshot store and can write it back.
//!
//! Restore clears the proposal's live keys and then repopulates them in one
//! best-effort batch without holding any lock. A restore racing live votes can
//! lose writes, so treat it as a maintenance operation.

use std::collections::BTreeSet;
use std::sync::Arc;

use liquid_store::{ProposalStore, SnapshotStore, VotingStore};
use liquid_types::{Clock, ProposalId, Snapshot, SnapshotId, SnapshotKind, WalletAddress};

use crate::metrics::LiquidMetrics;
use crate::tracing_spans::snapshot_span;
use crate::NodeError;

pub const DEFAULT_HOURLY_RETAINED: usize = 10;

/// Per-proposal outcome of a batch snapshot run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub created: Vec<(ProposalId, SnapshotId)>,
    pub failed: Vec<(ProposalId, String)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Structural problems found in a proposal's live state.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IntegrityFindings {
    pub proposal_id: Option<ProposalId>,
    /// Wallets holding a vote and a delegation at once.
    pub vote_and_delegation: Vec<WalletAddress>,
    pub self_delegations: Vec<WalletAddress>,
    /// Votes or delegations from wallets missing in the participant set.
    pub missing_participants: Vec<WalletAddress>,
}

impl IntegrityFindings {
    pub fn is_clean(&self) -> bool {
        self.vote_and_delegation.is_empty()
            && self.self_delegations.is_empty()
            && self.missing_participants.is_empty()
    }
}

pub struct SnapshotManager {
    voting: Arc<dyn VotingStore>,
    snapshots: Arc<dyn SnapshotStore>,
    proposals: Arc<dyn ProposalStore>,
    clock: Arc<dyn Clock>,
    hourly_retained: usize,
    metrics: Option<Arc<LiquidMetrics>>,
}

impl SnapshotManager {
    pub fn new(
        voting: Arc<dyn VotingStore>,
        snapshots: Arc<dyn SnapshotStore>,
        proposals: Arc<dyn ProposalStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            voting,
            snapshots,
            proposals,
            clock,
            hourly_retained: DEFAULT_HOURLY_RETAINED,
            metrics: None,
        }
    }

    pub fn with_hourly_retained(mut self, keep: usize) -> Self {
        self.hourly_retained = keep;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<LiquidMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Capture the proposal's live state as one durable snapshot.
    ///
    /// Creating an hourly snapshot also prunes older hourly snapshots of the
    /// same proposal; a failed prune is logged and does not fail the call.
    pub fn create_snapshot(
        &self,
        proposal: &ProposalId,
        kind: SnapshotKind,
    ) -> Result<Snapshot, NodeError> {
        let _span = snapshot_span(proposal, kind).entered();
        let result = self
            .voting
            .capture_state(proposal)
            .and_then(|state| {
                self.snapshots
                    .put_snapshot(proposal, kind, self.clock.now(), &state)
            });
        let snapshot = match result {
            Ok(s) => s,
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.snapshots_failed.inc();
                }
                tracing::error!(proposal = %proposal, kind = kind.as_str(), error = %e, "snapshot failed");
                return Err(e.into());
            }
        };
        if let Some(m) = &self.metrics {
            m.snapshots_created.inc();
        }
        tracing::info!(
            proposal = %proposal,
            kind = kind.as_str(),
            snapshot = snapshot.id.0,
            votes = snapshot.state.votes.len(),
            delegations = snapshot.state.delegations.len(),
            participants = snapshot.state.participants.len(),
            "snapshot created"
        );

        if kind == SnapshotKind::Hourly {
            if let Err(e) = self.cleanup_old_snapshots(proposal) {
                tracing::warn!(proposal = %proposal, error = %e, "hourly snapshot cleanup failed");
            }
        }
        Ok(snapshot)
    }

    /// Snapshot each proposal independently, collecting per-proposal results.
    pub fn create_snapshots(&self, proposals: &[ProposalId], kind: SnapshotKind) -> BatchReport {
        let mut report = BatchReport::default();
        for proposal in proposals {
            match self.create_snapshot(proposal, kind) {
                Ok(snapshot) => report.created.push((proposal.clone(), snapshot.id)),
                Err(e) => report.failed.push((proposal.clone(), e.to_string())),
            }
        }
        report
    }

    /// Write a snapshot back into the live store: the given one, or the
    /// proposal's most recent if `id` is `None`.
    pub fn restore_from_snapshot(
        &self,
        proposal: &ProposalId,
        id: Option<SnapshotId>,
    ) -> Result<Snapshot, NodeError> {
        let snapshot = match id {
            Some(id) => self
                .snapshots
                .get_snapshot(id)?
                .ok_or_else(|| NodeError::NoSnapshot(proposal.clone()))?,
            None => self
                .snapshots
                .latest_snapshot(proposal)?
                .ok_or_else(|| NodeError::NoSnapshot(proposal.clone()))?,
        };
        if &snapshot.proposal_id != proposal {
            return Err(NodeError::SnapshotMismatch {
                id: snapshot.id,
                owner: snapshot.proposal_id,
                requested: proposal.clone(),
            });
        }

        tracing::warn!(
            proposal = %proposal,
            snapshot = snapshot.id.0,
            kind = snapshot.kind.as_str(),
            taken_at = %snapshot.taken_at.to_iso8601(),
            "restoring proposal state from snapshot; live keys are cleared first"
        );
        self.voting.clear_proposal(proposal)?;
        self.voting.restore_state(proposal, &snapshot.state)?;
        tracing::info!(
            proposal = %proposal,
            snapshot = snapshot.id.0,
            participants = snapshot.state.participants.len(),
            "proposal state restored"
        );
        Ok(snapshot)
    }

    /// Keep the newest `hourly_retained` hourly snapshots of a proposal and
    /// delete the rest. Pre-calculation and manual snapshots are kept forever.
    /// Returns how many were deleted.
    pub fn cleanup_old_snapshots(&self, proposal: &ProposalId) -> Result<usize, NodeError> {
        let stale: Vec<SnapshotId> = self
            .snapshots
            .list_snapshots(proposal)?
            .into_iter()
            .filter(|s| s.kind == SnapshotKind::Hourly)
            .skip(self.hourly_retained)
            .map(|s| s.id)
            .collect();

        let mut deleted = 0;
        for id in stale {
            if self.snapshots.delete_snapshot(id)? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            if let Some(m) = &self.metrics {
                m.snapshots_pruned.inc_by(deleted as u64);
            }
            tracing::debug!(proposal = %proposal, deleted, "pruned hourly snapshots");
        }
        Ok(deleted)
    }

    /// Run [`SnapshotManager::cleanup_old_snapshots`] for every proposal that
    /// has snapshots. Failures are logged per proposal.
    pub fn cleanup_all(&self) -> Result<usize, NodeError> {
        let mut deleted = 0;
        for proposal in self.snapshots.snapshot_proposals()? {
            match self.cleanup_old_snapshots(&proposal) {
                Ok(n) => deleted += n,
                Err(e) => {
                    tracing::warn!(proposal = %proposal, error = %e, "snapshot cleanup failed")
                }
            }
        }
        Ok(deleted)
    }

    /// The periodic job: snapshot every open proposal that has at least one
    /// participant.
    pub fn create_hourly_snapshots(&self) -> Result<BatchReport, NodeError> {
        let now = self.clock.now();
        let mut targets = Vec::new();
        for proposal in self.proposals.open_proposals(now)? {
            match self.voting.get_all_participants(&proposal.id) {
                Ok(p) if p.is_empty() => {}
                Ok(_) => targets.push(proposal.id),
                Err(e) => {
                    tracing::warn!(proposal = %proposal.id, error = %e, "cannot read participants");
                    if e.is_unavailable() {
                        return Err(e.into());
                    }
                }
            }
        }
        let report = self.create_snapshots(&targets, SnapshotKind::Hourly);
        tracing::info!(
            created = report.created.len(),
            failed = report.failed.len(),
            "hourly snapshots done"
        );
        Ok(report)
    }

    /// Check the live state for conditions the store contract should make
    /// impossible. Findings indicate a lost race or a bug.
    pub fn verify_proposal_data(&self, proposal: &ProposalId) -> Result<IntegrityFindings, NodeError> {
        let state = self.voting.capture_state(proposal)?;
        let mut findings = IntegrityFindings {
            proposal_id: Some(proposal.clone()),
            ..IntegrityFindings::default()
        };

        for (delegator, delegate) in &state.delegations {
            if state.votes.contains_key(delegator) {
                findings.vote_and_delegation.push(delegator.clone());
            }
            if delegator == delegate {
                findings.self_delegations.push(delegator.clone());
            }
        }
        let actors: BTreeSet<&WalletAddress> =
            state.votes.keys().chain(state.delegations.keys()).collect();
        findings.missing_participants = actors
            .into_iter()
            .filter(|w| !state.participants.contains(*w))
            .cloned()
            .collect();

        if findings.is_clean() {
            tracing::debug!(proposal = %proposal, "proposal data verified");
        } else {
            tracing::warn!(
                proposal = %proposal,
                vote_and_delegation = findings.vote_and_delegation.len(),
                self_delegations = findings.self_delegations.len(),
                missing_participants = findings.missing_participants.len(),
                "proposal data integrity problems"
            );
        }
        Ok(findings)
    }
}

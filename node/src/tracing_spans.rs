//! [`tracing::Span`] constructors for proposal processing.
//!
//! Consistent span names make a proposal's resolve → tally → expire run easy
//! to follow in JSON logs.

use tracing::{info_span, Span};

use liquid_types::{ProposalId, SnapshotKind};

/// One scheduler run (resolve + tally) of a proposal.
pub fn process_span(proposal: &ProposalId) -> Span {
    info_span!("process_proposal", proposal = %proposal)
}

/// One scheduler sweep.
pub fn sweep_span() -> Span {
    info_span!("scheduler_sweep")
}

pub fn snapshot_span(proposal: &ProposalId, kind: SnapshotKind) -> Span {
    info_span!("snapshot", proposal = %proposal, kind = kind.as_str())
}

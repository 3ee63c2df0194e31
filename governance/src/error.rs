use liquid_store::{ErrorKind, StoreError};
use liquid_types::{InputError, ProposalId};
use thiserror::Error;

use crate::cycle::Cycle;

#[derive(Debug, Clone, Error)]
pub enum GovernanceError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("proposal {0} not found")]
    ProposalNotFound(ProposalId),

    #[error("voting on proposal {0} has closed")]
    VotingClosed(ProposalId),

    #[error("delegation rejected: {0}")]
    Cycle(Cycle),

    #[error("wallet is cooling down for another {remaining_secs}s")]
    Cooldown { remaining_secs: u64 },

    #[error("no completed resolution for proposal {0}")]
    NoResolution(ProposalId),

    #[error("voting store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for GovernanceError {
    fn from(e: StoreError) -> Self {
        match e.kind() {
            ErrorKind::Unavailable => GovernanceError::StoreUnavailable(e.to_string()),
            _ => GovernanceError::Store(e),
        }
    }
}

impl GovernanceError {
    /// A failed audit write of `what`.
    pub fn persistence(what: &str, e: StoreError) -> Self {
        GovernanceError::Persistence(format!("{what}: {e}"))
    }

    /// Stable label stored in error records.
    pub fn kind_label(&self) -> &'static str {
        match self {
            GovernanceError::Input(_) => "input",
            GovernanceError::ProposalNotFound(_) => "proposal_not_found",
            GovernanceError::VotingClosed(_) => "voting_closed",
            GovernanceError::Cycle(_) => "cycle",
            GovernanceError::Cooldown { .. } => "cooldown",
            GovernanceError::NoResolution(_) => "no_resolution",
            GovernanceError::StoreUnavailable(_) => "store_unavailable",
            GovernanceError::Persistence(_) => "persistence",
            GovernanceError::Store(e) => e.kind().as_str(),
        }
    }
}

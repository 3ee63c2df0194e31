use thiserror::Error;

use liquid_types::{ProposalId, SnapshotId};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("governance error: {0}")]
    Governance(#[from] liquid_governance::GovernanceError),

    #[error("store error: {0}")]
    Store(#[from] liquid_store::StoreError),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] liquid_store_lmdb::LmdbError),

    #[error("no snapshot found for proposal {0}")]
    NoSnapshot(ProposalId),

    #[error("snapshot {id:?} belongs to proposal {owner}, not {requested}")]
    SnapshotMismatch {
        id: SnapshotId,
        owner: ProposalId,
        requested: ProposalId,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("metrics error: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("scheduler is shut down")]
    SchedulerStopped,
}

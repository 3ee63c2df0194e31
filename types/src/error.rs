//! Input validation errors shared across crates.

use thiserror::Error;

/// Rejected before anything reaches a store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("invalid wallet address: {0:?}")]
    InvalidAddress(String),

    #[error("invalid proposal id: {0:?}")]
    InvalidProposalId(String),

    #[error("option {0} is not declared on this proposal")]
    UnknownOption(u32),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

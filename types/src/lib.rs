//! Fundamental types for liquid-democracy vote resolution.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! wallet and proposal identifiers, timestamps and clocks, and the durable
//! records produced by resolution, tallying, and snapshotting.

pub mod address;
pub mod error;
pub mod proposal;
pub mod record;
pub mod snapshot;
pub mod time;

pub use address::WalletAddress;
pub use error::InputError;
pub use proposal::{OptionNumber, Proposal, ProposalId, ProposalOption};
pub use record::{
    AuditStatus, ErrorEntry, ProcessingStage, ResolutionRecord, ResolvedDelegation, TallyRecord,
    TallySummary, VoteBreakdown,
};
pub use snapshot::{ProposalState, Snapshot, SnapshotId, SnapshotKind};
pub use time::{Clock, SystemClock, Timestamp};

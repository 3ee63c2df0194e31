//! Abstract storage traits for liquid-democracy vote resolution.
//!
//! Two kinds of storage sit behind these traits:
//! - the **ephemeral voting store** ([`VotingStore`]), a low-latency key-value
//!   store holding per-proposal mutable state (Redis in production);
//! - the **durable store** ([`AuditStore`], [`SnapshotStore`],
//!   [`ProposalStore`]) holding audit records, snapshots and proposal
//!   definitions (LMDB in production).
//!
//! Every backend, including the in-memory nullables used in tests, implements
//! these traits. The rest of the codebase depends only on the traits.

pub mod audit;
pub mod error;
pub mod keys;
pub mod proposal;
pub mod snapshot;
pub mod voting;

pub use audit::AuditStore;
pub use error::{ErrorKind, StoreError};
pub use proposal::ProposalStore;
pub use snapshot::SnapshotStore;
pub use voting::{VotingStore, WalletStatus};

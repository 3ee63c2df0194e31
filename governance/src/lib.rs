//! Liquid democracy: delegation resolution and weighted tallying.
//!
//! Participants either vote directly or delegate to another wallet. Chains are
//! transitive (A→B→C means A's vote goes to C) and must stay acyclic.
//!
//! - [`cycle`] rejects delegations that would close a loop.
//! - [`resolver`] walks every chain to its sink and computes voting power.
//! - [`tally`] weights cast votes by that power and picks a winner.
//! - [`voting`] is the guarded front door for vote / delegate mutations.
//!
//! Key principle: one participant = one unit of power, however long the chain.

pub mod cycle;
pub mod error;
pub mod resolver;
pub mod tally;
pub mod voting;

pub use cycle::{Cycle, CycleDetector, CycleReason, MAX_DELEGATION_HOPS};
pub use error::GovernanceError;
pub use resolver::{
    record_error, record_resolution_failure, swallow_persistence, DelegationResolver, Resolution,
};
pub use tally::{TallyEngine, TallyOutcome};
pub use voting::VotingService;

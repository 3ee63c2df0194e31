//! Nullable infrastructure for deterministic testing.
//!
//! All external dependencies (clock, ephemeral voting store, durable stores)
//! are abstracted behind traits. This crate provides test-friendly
//! implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically (time travel, injected outages)
//! - Never touch the filesystem or network
//!
//! Usage: swap Redis/LMDB implementations for nullables in tests.

pub mod clock;
pub mod durable;
pub mod voting;

pub use clock::NullClock;
pub use durable::{NullAuditStore, NullProposalStore, NullSnapshotStore};
pub use voting::NullVotingStore;

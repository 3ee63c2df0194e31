//! Redis backend for the ephemeral voting store.
//!
//! Implements [`liquid_store::VotingStore`] over a synchronous `redis`
//! connection using the key layout in [`liquid_store::keys`].

pub mod error;
pub mod voting;

pub use error::RedisStoreError;
pub use voting::RedisVotingStore;

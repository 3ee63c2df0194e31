//! LMDB durable storage backend.
//!
//! Implements the durable storage traits from `liquid-store` using the `heed`
//! LMDB bindings. Each logical store maps to one or more named databases within
//! a single environment; values are `bincode`-encoded.

pub mod audit;
pub mod environment;
pub mod error;
pub mod integrity;
pub mod meta;
pub mod migration;
pub mod proposal;
pub mod snapshot;

mod codec;

pub use audit::LmdbAuditStore;
pub use environment::LmdbEnvironment;
pub use error::LmdbError;
pub use meta::LmdbMetaStore;
pub use integrity::{check_data_dir, check_integrity, IntegrityReport};
pub use proposal::LmdbProposalStore;
pub use snapshot::LmdbSnapshotStore;

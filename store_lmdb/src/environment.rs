//! LMDB environment setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::audit::LmdbAuditStore;
use crate::meta::LmdbMetaStore;
use crate::migration::Migrator;
use crate::proposal::LmdbProposalStore;
use crate::snapshot::LmdbSnapshotStore;
use crate::LmdbError;

/// Default map size: 1 GiB. Audit records and snapshots are small.
pub const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;
pub const DEFAULT_MAX_DBS: u32 = 16;

pub(crate) const PROPOSALS_DB: &str = "proposals";
pub(crate) const RESOLUTIONS_DB: &str = "resolutions";
pub(crate) const TALLIES_DB: &str = "tallies";
pub(crate) const TALLY_SUMMARIES_DB: &str = "tally_summaries";
pub(crate) const ERRORS_DB: &str = "errors";
pub(crate) const SNAPSHOTS_DB: &str = "snapshots";
pub(crate) const SNAPSHOT_INDEX_DB: &str = "snapshot_index";
pub(crate) const META_DB: &str = "meta";

/// Wraps the LMDB environment and all database handles.
pub struct LmdbEnvironment {
    env: Arc<Env>,
    path: PathBuf,
    proposals_db: Database<Bytes, Bytes>,
    resolutions_db: Database<Bytes, Bytes>,
    tallies_db: Database<Bytes, Bytes>,
    tally_summaries_db: Database<Bytes, Bytes>,
    errors_db: Database<Bytes, Bytes>,
    snapshots_db: Database<Bytes, Bytes>,
    snapshot_index_db: Database<Bytes, Bytes>,
    meta_db: Database<Bytes, Bytes>,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at the given path, creating every
    /// named database and bringing the schema up to date.
    pub fn open(path: &Path, max_dbs: u32, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;

        // SAFETY: the environment is opened once per process and the data
        // directory is not shared with other writers that could truncate it.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(max_dbs)
                .open(path)
        }?;

        let mut wtxn = env.write_txn()?;
        let mut create = |name: &str| -> Result<Database<Bytes, Bytes>, LmdbError> {
            Ok(env.create_database(&mut wtxn, Some(name))?)
        };
        let proposals_db = create(PROPOSALS_DB)?;
        let resolutions_db = create(RESOLUTIONS_DB)?;
        let tallies_db = create(TALLIES_DB)?;
        let tally_summaries_db = create(TALLY_SUMMARIES_DB)?;
        let errors_db = create(ERRORS_DB)?;
        let snapshots_db = create(SNAPSHOTS_DB)?;
        let snapshot_index_db = create(SNAPSHOT_INDEX_DB)?;
        let meta_db = create(META_DB)?;
        wtxn.commit()?;

        let environment = Self {
            env: Arc::new(env),
            path: path.to_path_buf(),
            proposals_db,
            resolutions_db,
            tallies_db,
            tally_summaries_db,
            errors_db,
            snapshots_db,
            snapshot_index_db,
            meta_db,
        };
        Migrator::run(&environment.meta_store())?;
        tracing::info!(path = %path.display(), "LMDB environment opened");
        Ok(environment)
    }

    /// Open with [`DEFAULT_MAX_DBS`] and [`DEFAULT_MAP_SIZE`].
    pub fn open_default(path: &Path) -> Result<Self, LmdbError> {
        Self::open(path, DEFAULT_MAX_DBS, DEFAULT_MAP_SIZE)
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn audit_store(&self) -> LmdbAuditStore {
        LmdbAuditStore {
            env: Arc::clone(&self.env),
            resolutions_db: self.resolutions_db,
            tallies_db: self.tallies_db,
            tally_summaries_db: self.tally_summaries_db,
            errors_db: self.errors_db,
            meta_db: self.meta_db,
        }
    }

    pub fn snapshot_store(&self) -> LmdbSnapshotStore {
        LmdbSnapshotStore {
            env: Arc::clone(&self.env),
            snapshots_db: self.snapshots_db,
            snapshot_index_db: self.snapshot_index_db,
            meta_db: self.meta_db,
        }
    }

    pub fn proposal_store(&self) -> LmdbProposalStore {
        LmdbProposalStore {
            env: Arc::clone(&self.env),
            proposals_db: self.proposals_db,
        }
    }

    pub fn meta_store(&self) -> LmdbMetaStore {
        LmdbMetaStore {
            env: Arc::clone(&self.env),
            meta_db: self.meta_db,
        }
    }
}

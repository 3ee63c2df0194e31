//! Environment metadata: schema version and id sequences.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, RwTxn};

use crate::codec::read_u64;
use crate::LmdbError;

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

pub(crate) const SNAPSHOT_SEQUENCE_KEY: &[u8] = b"snapshot_seq";
pub(crate) const ERROR_SEQUENCE_KEY: &[u8] = b"error_seq";

pub struct LmdbMetaStore {
    pub(crate) env: Arc<Env>,
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl LmdbMetaStore {
    /// Stored schema version, `0` for a fresh environment.
    pub fn schema_version(&self) -> Result<u32, LmdbError> {
        let rtxn = self.env.read_txn()?;
        match self.meta_db.get(&rtxn, SCHEMA_VERSION_KEY)? {
            None => Ok(0),
            Some(bytes) => {
                let arr: [u8; 4] = bytes.try_into().map_err(|_| {
                    LmdbError::Serialization(format!(
                        "schema version has {} bytes, expected 4",
                        bytes.len()
                    ))
                })?;
                Ok(u32::from_le_bytes(arr))
            }
        }
    }

    pub fn set_schema_version(&self, version: u32) -> Result<(), LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        self.meta_db
            .put(&mut wtxn, SCHEMA_VERSION_KEY, &version.to_le_bytes())?;
        wtxn.commit()?;
        Ok(())
    }
}

/// Bump and return the sequence stored under `key`. Sequences start at 1.
///
/// Runs inside the caller's write transaction, so the id is only consumed if
/// the row that uses it commits.
pub(crate) fn next_sequence(
    meta_db: &Database<Bytes, Bytes>,
    wtxn: &mut RwTxn<'_>,
    key: &[u8],
) -> Result<u64, liquid_store::StoreError> {
    let current = read_u64(meta_db.get(&*wtxn, key).map_err(LmdbError::from)?)?;
    let next = current + 1;
    meta_db
        .put(wtxn, key, &next.to_be_bytes())
        .map_err(LmdbError::from)?;
    Ok(next)
}

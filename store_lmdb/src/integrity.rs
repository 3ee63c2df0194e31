//! LMDB database integrity checks.
//!
//! Run on startup to detect corruption early, before the scheduler begins
//! processing proposals.

use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::Env;

use crate::codec::split_composite_key;
use crate::environment::{
    ERRORS_DB, META_DB, PROPOSALS_DB, RESOLUTIONS_DB, SNAPSHOTS_DB, SNAPSHOT_INDEX_DB,
    TALLIES_DB, TALLY_SUMMARIES_DB,
};
use crate::LmdbError;

/// Summary of an integrity check run.
#[derive(Debug)]
pub struct IntegrityReport {
    pub databases_checked: u32,
    pub total_entries: u64,
    pub errors: Vec<String>,
}

impl IntegrityReport {
    /// Returns `true` if no errors were detected.
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty()
    }
}

const EXPECTED_DATABASES: &[&str] = &[
    PROPOSALS_DB,
    RESOLUTIONS_DB,
    TALLIES_DB,
    TALLY_SUMMARIES_DB,
    ERRORS_DB,
    SNAPSHOTS_DB,
    SNAPSHOT_INDEX_DB,
    META_DB,
];

/// Check LMDB database integrity on startup.
///
/// Opens each expected database and counts entries, then verifies that every
/// snapshot index row points at a stored snapshot. Read failures are recorded
/// in the report rather than causing a hard error.
pub fn check_integrity(env: &Arc<Env>) -> Result<IntegrityReport, LmdbError> {
    let mut report = IntegrityReport {
        databases_checked: 0,
        total_entries: 0,
        errors: Vec::new(),
    };

    let rtxn = env.read_txn()?;

    for &db_name in EXPECTED_DATABASES {
        match env.open_database::<Bytes, Bytes>(&rtxn, Some(db_name)) {
            Ok(Some(db)) => {
                report.databases_checked += 1;
                match db.len(&rtxn) {
                    Ok(count) => report.total_entries += count,
                    Err(e) => report
                        .errors
                        .push(format!("failed to read database '{}': {}", db_name, e)),
                }
            }
            Ok(None) => {
                report
                    .errors
                    .push(format!("database '{}' is missing", db_name));
            }
            Err(e) => {
                report
                    .errors
                    .push(format!("failed to open database '{}': {}", db_name, e));
            }
        }
    }

    let index = env.open_database::<Bytes, Bytes>(&rtxn, Some(SNAPSHOT_INDEX_DB))?;
    let snapshots = env.open_database::<Bytes, Bytes>(&rtxn, Some(SNAPSHOTS_DB))?;
    if let (Some(index), Some(snapshots)) = (index, snapshots) {
        for entry in index.iter(&rtxn)? {
            let (key, _) = entry?;
            let id = match split_composite_key(key) {
                Ok((_, id)) => id,
                Err(e) => {
                    report.errors.push(format!("snapshot index: {e}"));
                    continue;
                }
            };
            if snapshots.get(&rtxn, &id.to_be_bytes())?.is_none() {
                report
                    .errors
                    .push(format!("snapshot index references missing snapshot {id}"));
            }
        }
    }

    Ok(report)
}

/// Check if the LMDB data directory looks valid before opening.
///
/// A nonexistent or empty directory is a fresh start. A non-empty directory
/// without `data.mdb` suggests corruption or a wrong path.
pub fn check_data_dir(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Ok(());
    }
    let empty = std::fs::read_dir(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?
        .next()
        .is_none();
    if !empty && !path.join("data.mdb").exists() {
        return Err(format!(
            "LMDB directory exists but data.mdb is missing at {}",
            path.display()
        ));
    }
    Ok(())
}

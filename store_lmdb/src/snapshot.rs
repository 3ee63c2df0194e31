//! LMDB implementation of SnapshotStore.
//!
//! Snapshots live in `snapshots` keyed by `id_be`. `snapshot_index` holds one
//! empty-valued row per snapshot keyed `proposal ++ 0x00 ++ id_be`, so a
//! proposal's snapshots come back in id order from a prefix scan.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use liquid_store::{SnapshotStore, StoreError};
use liquid_types::{ProposalId, ProposalState, Snapshot, SnapshotId, SnapshotKind, Timestamp};

use crate::codec::{composite_key, decode, encode, prefix_key, split_composite_key};
use crate::meta::{next_sequence, SNAPSHOT_SEQUENCE_KEY};
use crate::LmdbError;

pub struct LmdbSnapshotStore {
    pub(crate) env: Arc<Env>,
    pub(crate) snapshots_db: Database<Bytes, Bytes>,
    pub(crate) snapshot_index_db: Database<Bytes, Bytes>,
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl SnapshotStore for LmdbSnapshotStore {
    fn put_snapshot(
        &self,
        proposal: &ProposalId,
        kind: SnapshotKind,
        taken_at: Timestamp,
        state: &ProposalState,
    ) -> Result<Snapshot, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let id = SnapshotId(next_sequence(&self.meta_db, &mut wtxn, SNAPSHOT_SEQUENCE_KEY)?);
        let snapshot = Snapshot {
            id,
            proposal_id: proposal.clone(),
            kind,
            taken_at,
            state: state.clone(),
        };
        let value = encode(&snapshot)?;
        self.snapshots_db
            .put(&mut wtxn, &id.0.to_be_bytes(), &value)
            .map_err(LmdbError::from)?;
        self.snapshot_index_db
            .put(&mut wtxn, &composite_key(proposal.as_str(), id.0), &[])
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(snapshot)
    }

    fn get_snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self
            .snapshots_db
            .get(&rtxn, &id.0.to_be_bytes())
            .map_err(LmdbError::from)?
        {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn list_snapshots(&self, proposal: &ProposalId) -> Result<Vec<Snapshot>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let prefix = prefix_key(proposal.as_str());
        let mut snapshots = Vec::new();
        for item in self
            .snapshot_index_db
            .rev_prefix_iter(&rtxn, &prefix)
            .map_err(LmdbError::from)?
        {
            let (key, _) = item.map_err(LmdbError::from)?;
            let (_, id) = split_composite_key(key)?;
            let bytes = self
                .snapshots_db
                .get(&rtxn, &id.to_be_bytes())
                .map_err(LmdbError::from)?
                .ok_or_else(|| {
                    StoreError::Corruption(format!("snapshot index references missing snapshot {id}"))
                })?;
            snapshots.push(decode(bytes)?);
        }
        Ok(snapshots)
    }

    fn delete_snapshot(&self, id: SnapshotId) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let key = id.0.to_be_bytes();
        let snapshot: Option<Snapshot> = match self
            .snapshots_db
            .get(&wtxn, &key)
            .map_err(LmdbError::from)?
        {
            Some(bytes) => Some(decode(bytes)?),
            None => None,
        };
        let Some(snapshot) = snapshot else {
            return Ok(false);
        };
        self.snapshots_db
            .delete(&mut wtxn, &key)
            .map_err(LmdbError::from)?;
        self.snapshot_index_db
            .delete(&mut wtxn, &composite_key(snapshot.proposal_id.as_str(), id.0))
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(true)
    }

    fn snapshot_proposals(&self) -> Result<Vec<ProposalId>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let mut ids: Vec<ProposalId> = Vec::new();
        for item in self.snapshot_index_db.iter(&rtxn).map_err(LmdbError::from)? {
            let (key, _) = item.map_err(LmdbError::from)?;
            let (owner, _) = split_composite_key(key)?;
            if ids.last().map(ProposalId::as_str) != Some(owner) {
                ids.push(ProposalId::new(owner));
            }
        }
        Ok(ids)
    }
}

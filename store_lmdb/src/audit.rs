//! LMDB implementation of AuditStore.
//!
//! Resolution and tally records are keyed by proposal id and upserted. The
//! tally summary is written in the same transaction as the full tally so the
//! two never disagree. Error entries are append-only, keyed
//! `proposal ++ 0x00 ++ seq_be`.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use liquid_store::{AuditStore, StoreError};
use liquid_types::{ErrorEntry, ProposalId, ResolutionRecord, TallyRecord, TallySummary};

use crate::codec::{composite_key, decode, encode, prefix_key};
use crate::meta::{next_sequence, ERROR_SEQUENCE_KEY};
use crate::LmdbError;

pub struct LmdbAuditStore {
    pub(crate) env: Arc<Env>,
    pub(crate) resolutions_db: Database<Bytes, Bytes>,
    pub(crate) tallies_db: Database<Bytes, Bytes>,
    pub(crate) tally_summaries_db: Database<Bytes, Bytes>,
    pub(crate) errors_db: Database<Bytes, Bytes>,
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl LmdbAuditStore {
    fn get_by_proposal<T: serde::de::DeserializeOwned>(
        &self,
        db: &Database<Bytes, Bytes>,
        proposal: &ProposalId,
    ) -> Result<Option<T>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match db
            .get(&rtxn, proposal.as_str().as_bytes())
            .map_err(LmdbError::from)?
        {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }
}

impl AuditStore for LmdbAuditStore {
    fn save_resolution(&self, record: &ResolutionRecord) -> Result<(), StoreError> {
        let value = encode(record)?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.resolutions_db
            .put(&mut wtxn, record.proposal_id.as_str().as_bytes(), &value)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn get_resolution(
        &self,
        proposal: &ProposalId,
    ) -> Result<Option<ResolutionRecord>, StoreError> {
        self.get_by_proposal(&self.resolutions_db, proposal)
    }

    fn save_tally(&self, record: &TallyRecord) -> Result<(), StoreError> {
        let key = record.proposal_id.as_str().as_bytes();
        let full = encode(record)?;
        let summary = encode(&record.summary())?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.tallies_db
            .put(&mut wtxn, key, &full)
            .map_err(LmdbError::from)?;
        self.tally_summaries_db
            .put(&mut wtxn, key, &summary)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn get_tally(&self, proposal: &ProposalId) -> Result<Option<TallyRecord>, StoreError> {
        self.get_by_proposal(&self.tallies_db, proposal)
    }

    fn get_tally_summary(
        &self,
        proposal: &ProposalId,
    ) -> Result<Option<TallySummary>, StoreError> {
        self.get_by_proposal(&self.tally_summaries_db, proposal)
    }

    fn record_error(&self, entry: &ErrorEntry) -> Result<(), StoreError> {
        let value = encode(entry)?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let seq = next_sequence(&self.meta_db, &mut wtxn, ERROR_SEQUENCE_KEY)?;
        let key = composite_key(entry.proposal_id.as_str(), seq);
        self.errors_db
            .put(&mut wtxn, &key, &value)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn list_errors(&self, proposal: &ProposalId) -> Result<Vec<ErrorEntry>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let prefix = prefix_key(proposal.as_str());
        let mut entries = Vec::new();
        for item in self
            .errors_db
            .prefix_iter(&rtxn, &prefix)
            .map_err(LmdbError::from)?
        {
            let (_, value) = item.map_err(LmdbError::from)?;
            entries.push(decode(value)?);
        }
        Ok(entries)
    }
}

//! LMDB implementation of ProposalStore.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use liquid_store::{ProposalStore, StoreError};
use liquid_types::{Proposal, ProposalId};

use crate::codec::{decode, encode};
use crate::LmdbError;

pub struct LmdbProposalStore {
    pub(crate) env: Arc<Env>,
    pub(crate) proposals_db: Database<Bytes, Bytes>,
}

impl ProposalStore for LmdbProposalStore {
    fn put_proposal(&self, proposal: &Proposal) -> Result<(), StoreError> {
        let value = encode(proposal)?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.proposals_db
            .put(&mut wtxn, proposal.id.as_str().as_bytes(), &value)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn get_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self
            .proposals_db
            .get(&rtxn, id.as_str().as_bytes())
            .map_err(LmdbError::from)?
        {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn list_proposals(&self) -> Result<Vec<Proposal>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let mut proposals = Vec::new();
        for item in self.proposals_db.iter(&rtxn).map_err(LmdbError::from)? {
            let (_, value) = item.map_err(LmdbError::from)?;
            proposals.push(decode(value)?);
        }
        Ok(proposals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LmdbEnvironment;
    use liquid_types::{ProposalOption, Timestamp};

    #[test]
    fn put_get_and_filter_by_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let env = LmdbEnvironment::open_default(dir.path()).unwrap();
        let store = env.proposal_store();

        for (id, deadline) in [("a", 100), ("b", 200)] {
            store
                .put_proposal(&Proposal {
                    id: ProposalId::new(id),
                    organization_id: "org".into(),
                    options: vec![ProposalOption { number: 1, text: "yes".into() }],
                    deadline: Timestamp::new(deadline),
                })
                .unwrap();
        }

        let b = store.get_proposal(&ProposalId::new("b")).unwrap().unwrap();
        assert_eq!(b.deadline, Timestamp::new(200));
        assert_eq!(store.list_proposals().unwrap().len(), 2);
        assert_eq!(store.proposals_due_before(Timestamp::new(150)).unwrap().len(), 1);
        assert!(store.get_proposal(&ProposalId::new("zz")).unwrap().is_none());
    }
}

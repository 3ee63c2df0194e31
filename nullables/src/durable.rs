//! Nullable durable stores: thread-safe in-memory storage for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use liquid_store::{AuditStore, ProposalStore, SnapshotStore, StoreError};
use liquid_types::{
    ErrorEntry, Proposal, ProposalId, ProposalState, ResolutionRecord, Snapshot, SnapshotId,
    SnapshotKind, TallyRecord, TallySummary, Timestamp,
};

/// An in-memory audit repository for testing.
///
/// [`NullAuditStore::set_fail_writes`] makes every save fail, to exercise the
/// "persistence failure must not crash the caller" paths.
pub struct NullAuditStore {
    resolutions: Mutex<HashMap<ProposalId, ResolutionRecord>>,
    tallies: Mutex<HashMap<ProposalId, TallyRecord>>,
    errors: Mutex<Vec<ErrorEntry>>,
    fail_writes: AtomicBool,
}

impl NullAuditStore {
    pub fn new() -> Self {
        Self {
            resolutions: Mutex::new(HashMap::new()),
            tallies: Mutex::new(HashMap::new()),
            errors: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Backend("null audit store rejects writes".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for NullAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditStore for NullAuditStore {
    fn save_resolution(&self, record: &ResolutionRecord) -> Result<(), StoreError> {
        self.check_write()?;
        self.resolutions
            .lock()
            .unwrap()
            .insert(record.proposal_id.clone(), record.clone());
        Ok(())
    }

    fn get_resolution(
        &self,
        proposal: &ProposalId,
    ) -> Result<Option<ResolutionRecord>, StoreError> {
        Ok(self.resolutions.lock().unwrap().get(proposal).cloned())
    }

    fn save_tally(&self, record: &TallyRecord) -> Result<(), StoreError> {
        self.check_write()?;
        self.tallies
            .lock()
            .unwrap()
            .insert(record.proposal_id.clone(), record.clone());
        Ok(())
    }

    fn get_tally(&self, proposal: &ProposalId) -> Result<Option<TallyRecord>, StoreError> {
        Ok(self.tallies.lock().unwrap().get(proposal).cloned())
    }

    fn get_tally_summary(
        &self,
        proposal: &ProposalId,
    ) -> Result<Option<TallySummary>, StoreError> {
        Ok(self
            .tallies
            .lock()
            .unwrap()
            .get(proposal)
            .map(TallyRecord::summary))
    }

    fn record_error(&self, entry: &ErrorEntry) -> Result<(), StoreError> {
        self.check_write()?;
        self.errors.lock().unwrap().push(entry.clone());
        Ok(())
    }

    fn list_errors(&self, proposal: &ProposalId) -> Result<Vec<ErrorEntry>, StoreError> {
        Ok(self
            .errors
            .lock()
            .unwrap()
            .iter()
            .filter(|e| &e.proposal_id == proposal)
            .cloned()
            .collect())
    }
}

/// An in-memory snapshot store for testing.
pub struct NullSnapshotStore {
    snapshots: Mutex<BTreeMap<SnapshotId, Snapshot>>,
    next_id: AtomicU64,
}

impl NullSnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NullSnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for NullSnapshotStore {
    fn put_snapshot(
        &self,
        proposal: &ProposalId,
        kind: SnapshotKind,
        taken_at: Timestamp,
        state: &ProposalState,
    ) -> Result<Snapshot, StoreError> {
        let id = SnapshotId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let snapshot = Snapshot {
            id,
            proposal_id: proposal.clone(),
            kind,
            taken_at,
            state: state.clone(),
        };
        self.snapshots.lock().unwrap().insert(id, snapshot.clone());
        Ok(snapshot)
    }

    fn get_snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.snapshots.lock().unwrap().get(&id).cloned())
    }

    fn list_snapshots(&self, proposal: &ProposalId) -> Result<Vec<Snapshot>, StoreError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .values()
            .rev()
            .filter(|s| &s.proposal_id == proposal)
            .cloned()
            .collect())
    }

    fn delete_snapshot(&self, id: SnapshotId) -> Result<bool, StoreError> {
        Ok(self.snapshots.lock().unwrap().remove(&id).is_some())
    }

    fn snapshot_proposals(&self) -> Result<Vec<ProposalId>, StoreError> {
        let mut ids: Vec<ProposalId> = self
            .snapshots
            .lock()
            .unwrap()
            .values()
            .map(|s| s.proposal_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

/// An in-memory proposal collaborator for testing.
pub struct NullProposalStore {
    proposals: Mutex<BTreeMap<ProposalId, Proposal>>,
    unavailable: AtomicBool,
}

impl NullProposalStore {
    pub fn new() -> Self {
        Self {
            proposals: Mutex::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("null proposal store switched off".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for NullProposalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProposalStore for NullProposalStore {
    fn put_proposal(&self, proposal: &Proposal) -> Result<(), StoreError> {
        self.check()?;
        self.proposals
            .lock()
            .unwrap()
            .insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    fn get_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError> {
        self.check()?;
        Ok(self.proposals.lock().unwrap().get(id).cloned())
    }

    fn list_proposals(&self) -> Result<Vec<Proposal>, StoreError> {
        self.check()?;
        Ok(self.proposals.lock().unwrap().values().cloned().collect())
    }
}

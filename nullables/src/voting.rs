//! Nullable voting store: in-memory stand-in for the Redis backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use liquid_store::{StoreError, VotingStore};
use liquid_types::{Clock, OptionNumber, ProposalId, ProposalState, Timestamp, WalletAddress};

use crate::NullClock;

#[derive(Default)]
struct ProposalEntry {
    votes: BTreeMap<WalletAddress, OptionNumber>,
    delegations: BTreeMap<WalletAddress, WalletAddress>,
    participants: BTreeSet<WalletAddress>,
    status: Option<String>,
    deadline: Option<Timestamp>,
    lock: Option<(String, Timestamp)>,
    expires_at: Option<Timestamp>,
}

#[derive(Default)]
struct State {
    proposals: HashMap<ProposalId, ProposalEntry>,
    cooldowns: HashMap<(WalletAddress, ProposalId), Timestamp>,
}

/// An in-memory voting store for testing.
///
/// Expiries (cooldowns, locks, retention) are evaluated lazily against the
/// injected clock. [`NullVotingStore::set_unavailable`] makes every call fail
/// with [`StoreError::Unavailable`].
pub struct NullVotingStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl NullVotingStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// A store driven by a fresh [`NullClock`] at time zero.
    pub fn with_null_clock() -> Self {
        Self::new(Arc::new(NullClock::new(0)))
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Write a delegation edge without clearing the delegator's vote, the way
    /// a lost race between two compound writes would leave it.
    pub fn inject_delegation(
        &self,
        proposal: &ProposalId,
        delegator: &WalletAddress,
        delegate: &WalletAddress,
    ) {
        let mut state = self.state.lock().unwrap();
        let entry = state.proposals.entry(proposal.clone()).or_default();
        entry.delegations.insert(delegator.clone(), delegate.clone());
        entry.participants.insert(delegator.clone());
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("null voting store switched off".into()))
        } else {
            Ok(())
        }
    }

    /// Run `f` against the live (non-expired) entry, if any.
    fn read<T>(
        &self,
        proposal: &ProposalId,
        f: impl FnOnce(&ProposalEntry) -> T,
    ) -> Result<Option<T>, StoreError> {
        self.check()?;
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        if state
            .proposals
            .get(proposal)
            .and_then(|e| e.expires_at)
            .is_some_and(|t| now >= t)
        {
            state.proposals.remove(proposal);
        }
        Ok(state.proposals.get(proposal).map(f))
    }

    fn write<T>(
        &self,
        proposal: &ProposalId,
        f: impl FnOnce(&mut ProposalEntry) -> T,
    ) -> Result<T, StoreError> {
        self.check()?;
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let entry = state.proposals.entry(proposal.clone()).or_default();
        if entry.expires_at.is_some_and(|t| now >= t) {
            *entry = ProposalEntry::default();
        }
        Ok(f(entry))
    }
}

impl VotingStore for NullVotingStore {
    fn cast_vote(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
        option: OptionNumber,
    ) -> Result<(), StoreError> {
        self.write(proposal, |e| {
            e.votes.insert(wallet.clone(), option);
            e.participants.insert(wallet.clone());
            e.delegations.remove(wallet);
        })
    }

    fn set_delegation(
        &self,
        proposal: &ProposalId,
        delegator: &WalletAddress,
        delegate: &WalletAddress,
    ) -> Result<(), StoreError> {
        self.write(proposal, |e| {
            e.delegations.insert(delegator.clone(), delegate.clone());
            e.participants.insert(delegator.clone());
            e.votes.remove(delegator);
        })
    }

    fn remove_vote(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<bool, StoreError> {
        self.write(proposal, |e| e.votes.remove(wallet).is_some())
    }

    fn remove_delegation(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<bool, StoreError> {
        self.write(proposal, |e| e.delegations.remove(wallet).is_some())
    }

    fn get_vote(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<Option<OptionNumber>, StoreError> {
        Ok(self
            .read(proposal, |e| e.votes.get(wallet).copied())?
            .flatten())
    }

    fn get_delegation(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<Option<WalletAddress>, StoreError> {
        Ok(self
            .read(proposal, |e| e.delegations.get(wallet).cloned())?
            .flatten())
    }

    fn get_all_votes(
        &self,
        proposal: &ProposalId,
    ) -> Result<BTreeMap<WalletAddress, OptionNumber>, StoreError> {
        Ok(self.read(proposal, |e| e.votes.clone())?.unwrap_or_default())
    }

    fn get_all_delegations(
        &self,
        proposal: &ProposalId,
    ) -> Result<BTreeMap<WalletAddress, WalletAddress>, StoreError> {
        Ok(self
            .read(proposal, |e| e.delegations.clone())?
            .unwrap_or_default())
    }

    fn get_all_participants(
        &self,
        proposal: &ProposalId,
    ) -> Result<BTreeSet<WalletAddress>, StoreError> {
        Ok(self
            .read(proposal, |e| e.participants.clone())?
            .unwrap_or_default())
    }

    fn is_participant(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<bool, StoreError> {
        Ok(self
            .read(proposal, |e| e.participants.contains(wallet))?
            .unwrap_or(false))
    }

    fn get_status(&self, proposal: &ProposalId) -> Result<Option<String>, StoreError> {
        Ok(self.read(proposal, |e| e.status.clone())?.flatten())
    }

    fn set_status(&self, proposal: &ProposalId, status: &str) -> Result<(), StoreError> {
        self.write(proposal, |e| e.status = Some(status.to_string()))
    }

    fn get_deadline(&self, proposal: &ProposalId) -> Result<Option<Timestamp>, StoreError> {
        Ok(self.read(proposal, |e| e.deadline)?.flatten())
    }

    fn set_deadline(&self, proposal: &ProposalId, deadline: Timestamp) -> Result<(), StoreError> {
        self.write(proposal, |e| e.deadline = Some(deadline))
    }

    fn try_start_cooldown(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
        secs: u64,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let key = (wallet.clone(), proposal.clone());
        let cooling = state.cooldowns.get(&key).is_some_and(|until| now < *until);
        if cooling {
            return Ok(false);
        }
        state.cooldowns.insert(key, now.plus_secs(secs));
        Ok(true)
    }

    fn cooldown_remaining(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<Option<u64>, StoreError> {
        self.check()?;
        let now = self.clock.now();
        let state = self.state.lock().unwrap();
        Ok(state
            .cooldowns
            .get(&(wallet.clone(), proposal.clone()))
            .filter(|until| now < **until)
            .map(|until| until.secs_until(now)))
    }

    fn try_acquire_lock(
        &self,
        proposal: &ProposalId,
        owner: &str,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        self.write(proposal, |e| {
            let held = e.lock.as_ref().is_some_and(|(_, until)| now < *until);
            if !held {
                e.lock = Some((owner.to_string(), now.plus_secs(ttl_secs)));
            }
            !held
        })
    }

    fn release_lock(&self, proposal: &ProposalId, owner: &str) -> Result<(), StoreError> {
        self.write(proposal, |e| {
            if e.lock.as_ref().is_some_and(|(o, _)| o == owner) {
                e.lock = None;
            }
        })
    }

    fn clear_proposal(&self, proposal: &ProposalId) -> Result<(), StoreError> {
        self.check()?;
        self.state.lock().unwrap().proposals.remove(proposal);
        Ok(())
    }

    fn restore_state(
        &self,
        proposal: &ProposalId,
        state: &ProposalState,
    ) -> Result<(), StoreError> {
        self.write(proposal, |e| {
            e.votes.extend(state.votes.iter().map(|(w, o)| (w.clone(), *o)));
            e.delegations.extend(
                state
                    .delegations
                    .iter()
                    .map(|(from, to)| (from.clone(), to.clone())),
            );
            e.participants.extend(state.participants.iter().cloned());
            if state.status.is_some() {
                e.status = state.status.clone();
            }
            if state.deadline.is_some() {
                e.deadline = state.deadline;
            }
        })
    }

    fn expire_proposal(&self, proposal: &ProposalId, ttl_secs: u64) -> Result<(), StoreError> {
        let at = self.clock.now().plus_secs(ttl_secs);
        self.write(proposal, |e| e.expires_at = Some(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<NullClock>, NullVotingStore, ProposalId) {
        let clock = Arc::new(NullClock::new(1_000));
        let store = NullVotingStore::new(clock.clone());
        (clock, store, ProposalId::new("p1"))
    }

    #[test]
    fn cast_vote_clears_delegation() {
        let (_, store, p) = setup();
        let a = WalletAddress::new("a");
        let b = WalletAddress::new("b");
        store.set_delegation(&p, &a, &b).unwrap();
        store.cast_vote(&p, &a, 2).unwrap();

        let status = store.wallet_status(&p, &a).unwrap();
        assert_eq!(status.vote, Some(2));
        assert_eq!(status.delegate, None);
        assert!(status.is_participant);
    }

    #[test]
    fn repeated_identical_vote_changes_nothing() {
        let (_, store, p) = setup();
        let a = WalletAddress::new("a");
        store.set_delegation(&p, &WalletAddress::new("b"), &a).unwrap();
        store.cast_vote(&p, &a, 3).unwrap();
        let once = store.capture_state(&p).unwrap();

        store.cast_vote(&p, &a, 3).unwrap();
        let twice = store.capture_state(&p).unwrap();
        assert_eq!(twice, once);
        assert_eq!(twice.votes.len(), 1);
        assert_eq!(twice.participants.len(), 2);
        assert_eq!(twice.delegations.len(), 1);
    }

    #[test]
    fn set_delegation_clears_vote() {
        let (_, store, p) = setup();
        let a = WalletAddress::new("a");
        store.cast_vote(&p, &a, 1).unwrap();
        store.set_delegation(&p, &a, &WalletAddress::new("b")).unwrap();
        assert_eq!(store.get_vote(&p, &a).unwrap(), None);
    }

    #[test]
    fn keys_come_back_normalized() {
        let (_, store, p) = setup();
        store.cast_vote(&p, &WalletAddress::new("0xABC"), 1).unwrap();
        let votes = store.get_all_votes(&p).unwrap();
        assert!(votes.contains_key(&WalletAddress::new("0xabc")));
    }

    #[test]
    fn cooldown_expires_with_clock() {
        let (clock, store, p) = setup();
        let a = WalletAddress::new("a");
        assert!(store.try_start_cooldown(&p, &a, 60).unwrap());
        assert!(!store.try_start_cooldown(&p, &a, 60).unwrap());
        assert_eq!(store.cooldown_remaining(&p, &a).unwrap(), Some(60));
        clock.advance(60);
        assert_eq!(store.cooldown_remaining(&p, &a).unwrap(), None);
        assert!(store.try_start_cooldown(&p, &a, 60).unwrap());
    }

    #[test]
    fn lock_is_exclusive_until_released_or_expired() {
        let (clock, store, p) = setup();
        assert!(store.try_acquire_lock(&p, "one", 30).unwrap());
        assert!(!store.try_acquire_lock(&p, "two", 30).unwrap());
        store.release_lock(&p, "two").unwrap();
        assert!(!store.try_acquire_lock(&p, "two", 30).unwrap());
        clock.advance(30);
        assert!(store.try_acquire_lock(&p, "two", 30).unwrap());
    }

    #[test]
    fn retention_expiry_drops_keys() {
        let (clock, store, p) = setup();
        store.cast_vote(&p, &WalletAddress::new("a"), 1).unwrap();
        store.expire_proposal(&p, 100).unwrap();
        clock.advance(99);
        assert_eq!(store.get_all_votes(&p).unwrap().len(), 1);
        clock.advance(1);
        assert!(store.get_all_votes(&p).unwrap().is_empty());
    }

    #[test]
    fn unavailable_fails_every_call() {
        let (_, store, p) = setup();
        store.set_unavailable(true);
        let err = store.get_all_votes(&p).unwrap_err();
        assert!(err.is_unavailable());
    }
}

//! Redis implementation of VotingStore.
//!
//! Compound writes go out as plain (non-`MULTI`) pipelines: each command is
//! atomic on the server but a concurrent reader can observe a partial write.
//! Cooldowns and locks use `SET NX EX`; a lock is released through a
//! compare-and-delete script so an expired holder cannot drop a newer one.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use redis::{Client, Connection, Pipeline, RedisResult, Script};

use liquid_store::{keys, StoreError, VotingStore};
use liquid_types::{OptionNumber, ProposalId, ProposalState, Timestamp, WalletAddress};

use crate::error::{is_connectivity, RedisStoreError};

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read / write timeout on the socket. A hung server surfaces as
/// `Unavailable` instead of parking the caller on the connection mutex.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RedisVotingStore {
    client: Client,
    conn: Mutex<Option<Connection>>,
    connect_timeout: Duration,
    io_timeout: Duration,
    release_script: Script,
}

impl RedisVotingStore {
    /// Create a store for `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// No connection is made until the first command.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(RedisStoreError::from)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            release_script: Script::new(RELEASE_LOCK_SCRIPT),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Round-trip a `PING`.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| redis::cmd("PING").query::<String>(conn))?;
        Ok(())
    }

    /// Run `f` on the shared connection, connecting on first use. A
    /// connectivity failure drops the connection so the next call reconnects.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> Result<T, RedisStoreError> {
        let mut guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            let conn = self
                .client
                .get_connection_with_timeout(self.connect_timeout)
                .map_err(|e| {
                    tracing::warn!(error = %e, "redis connection failed");
                    RedisStoreError::from(e)
                })?;
            conn.set_read_timeout(Some(self.io_timeout))
                .and_then(|_| conn.set_write_timeout(Some(self.io_timeout)))
                .map_err(RedisStoreError::from)?;
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(RedisStoreError::Unavailable("no redis connection".into()));
        };
        match f(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                if is_connectivity(&e) {
                    tracing::warn!(error = %e, "redis connection lost");
                    *guard = None;
                }
                Err(e.into())
            }
        }
    }

    fn run_pipeline(&self, pipe: &Pipeline) -> Result<(), StoreError> {
        self.with_conn(|conn| pipe.query::<()>(conn))?;
        Ok(())
    }
}

fn parse_option(key: &str, raw: &str) -> Result<OptionNumber, RedisStoreError> {
    raw.parse().map_err(|_| RedisStoreError::Malformed {
        key: key.to_string(),
        detail: format!("option number {raw:?}"),
    })
}

impl VotingStore for RedisVotingStore {
    fn cast_vote(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
        option: OptionNumber,
    ) -> Result<(), StoreError> {
        let mut pipe = redis::pipe();
        pipe.cmd("HSET")
            .arg(keys::votes(proposal))
            .arg(wallet.as_str())
            .arg(option)
            .ignore()
            .cmd("SADD")
            .arg(keys::participants(proposal))
            .arg(wallet.as_str())
            .ignore()
            .cmd("HDEL")
            .arg(keys::delegations(proposal))
            .arg(wallet.as_str())
            .ignore();
        self.run_pipeline(&pipe)
    }

    fn set_delegation(
        &self,
        proposal: &ProposalId,
        delegator: &WalletAddress,
        delegate: &WalletAddress,
    ) -> Result<(), StoreError> {
        let mut pipe = redis::pipe();
        pipe.cmd("HSET")
            .arg(keys::delegations(proposal))
            .arg(delegator.as_str())
            .arg(delegate.as_str())
            .ignore()
            .cmd("SADD")
            .arg(keys::participants(proposal))
            .arg(delegator.as_str())
            .ignore()
            .cmd("HDEL")
            .arg(keys::votes(proposal))
            .arg(delegator.as_str())
            .ignore();
        self.run_pipeline(&pipe)
    }

    fn remove_vote(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<bool, StoreError> {
        let removed: i64 = self.with_conn(|conn| {
            redis::cmd("HDEL")
                .arg(keys::votes(proposal))
                .arg(wallet.as_str())
                .query(conn)
        })?;
        Ok(removed > 0)
    }

    fn remove_delegation(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<bool, StoreError> {
        let removed: i64 = self.with_conn(|conn| {
            redis::cmd("HDEL")
                .arg(keys::delegations(proposal))
                .arg(wallet.as_str())
                .query(conn)
        })?;
        Ok(removed > 0)
    }

    fn get_vote(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<Option<OptionNumber>, StoreError> {
        let key = keys::votes(proposal);
        let raw: Option<String> = self.with_conn(|conn| {
            redis::cmd("HGET").arg(&key).arg(wallet.as_str()).query(conn)
        })?;
        Ok(raw.map(|r| parse_option(&key, &r)).transpose()?)
    }

    fn get_delegation(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<Option<WalletAddress>, StoreError> {
        let raw: Option<String> = self.with_conn(|conn| {
            redis::cmd("HGET")
                .arg(keys::delegations(proposal))
                .arg(wallet.as_str())
                .query(conn)
        })?;
        Ok(raw.map(WalletAddress::new))
    }

    fn get_all_votes(
        &self,
        proposal: &ProposalId,
    ) -> Result<BTreeMap<WalletAddress, OptionNumber>, StoreError> {
        let key = keys::votes(proposal);
        let raw: HashMap<String, String> =
            self.with_conn(|conn| redis::cmd("HGETALL").arg(&key).query(conn))?;
        let mut votes = BTreeMap::new();
        for (wallet, option) in raw {
            votes.insert(WalletAddress::new(wallet), parse_option(&key, &option)?);
        }
        Ok(votes)
    }

    fn get_all_delegations(
        &self,
        proposal: &ProposalId,
    ) -> Result<BTreeMap<WalletAddress, WalletAddress>, StoreError> {
        let raw: HashMap<String, String> = self.with_conn(|conn| {
            redis::cmd("HGETALL")
                .arg(keys::delegations(proposal))
                .query(conn)
        })?;
        Ok(raw
            .into_iter()
            .map(|(from, to)| (WalletAddress::new(from), WalletAddress::new(to)))
            .collect())
    }

    fn get_all_participants(
        &self,
        proposal: &ProposalId,
    ) -> Result<BTreeSet<WalletAddress>, StoreError> {
        let raw: Vec<String> = self.with_conn(|conn| {
            redis::cmd("SMEMBERS")
                .arg(keys::participants(proposal))
                .query(conn)
        })?;
        Ok(raw.into_iter().map(WalletAddress::new).collect())
    }

    fn is_participant(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<bool, StoreError> {
        Ok(self.with_conn(|conn| {
            redis::cmd("SISMEMBER")
                .arg(keys::participants(proposal))
                .arg(wallet.as_str())
                .query(conn)
        })?)
    }

    fn get_status(&self, proposal: &ProposalId) -> Result<Option<String>, StoreError> {
        Ok(self.with_conn(|conn| redis::cmd("GET").arg(keys::status(proposal)).query(conn))?)
    }

    fn set_status(&self, proposal: &ProposalId, status: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            redis::cmd("SET")
                .arg(keys::status(proposal))
                .arg(status)
                .query::<()>(conn)
        })?;
        Ok(())
    }

    fn get_deadline(&self, proposal: &ProposalId) -> Result<Option<Timestamp>, StoreError> {
        let key = keys::deadline(proposal);
        let raw: Option<String> = self.with_conn(|conn| redis::cmd("GET").arg(&key).query(conn))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let deadline = Timestamp::parse_iso8601(&raw).map_err(|e| RedisStoreError::Malformed {
            key,
            detail: e.to_string(),
        })?;
        Ok(Some(deadline))
    }

    fn set_deadline(&self, proposal: &ProposalId, deadline: Timestamp) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            redis::cmd("SET")
                .arg(keys::deadline(proposal))
                .arg(deadline.to_iso8601())
                .query::<()>(conn)
        })?;
        Ok(())
    }

    fn try_start_cooldown(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
        secs: u64,
    ) -> Result<bool, StoreError> {
        let reply: Option<String> = self.with_conn(|conn| {
            redis::cmd("SET")
                .arg(keys::cooldown(wallet, proposal))
                .arg(1)
                .arg("NX")
                .arg("EX")
                .arg(secs)
                .query(conn)
        })?;
        Ok(reply.is_some())
    }

    fn cooldown_remaining(
        &self,
        proposal: &ProposalId,
        wallet: &WalletAddress,
    ) -> Result<Option<u64>, StoreError> {
        // TTL: -2 missing key, -1 no expiry.
        let ttl: i64 = self.with_conn(|conn| {
            redis::cmd("TTL")
                .arg(keys::cooldown(wallet, proposal))
                .query(conn)
        })?;
        Ok(u64::try_from(ttl).ok().filter(|t| *t > 0))
    }

    fn try_acquire_lock(
        &self,
        proposal: &ProposalId,
        owner: &str,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let reply: Option<String> = self.with_conn(|conn| {
            redis::cmd("SET")
                .arg(keys::lock(proposal))
                .arg(owner)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs)
                .query(conn)
        })?;
        Ok(reply.is_some())
    }

    fn release_lock(&self, proposal: &ProposalId, owner: &str) -> Result<(), StoreError> {
        let released: i64 = self.with_conn(|conn| {
            self.release_script
                .key(keys::lock(proposal))
                .arg(owner)
                .invoke(conn)
        })?;
        if released == 0 {
            tracing::debug!(proposal = %proposal, owner, "lock already released or taken over");
        }
        Ok(())
    }

    fn clear_proposal(&self, proposal: &ProposalId) -> Result<(), StoreError> {
        let all = keys::proposal_keys(proposal).to_vec();
        self.with_conn(|conn| redis::cmd("DEL").arg(&all).query::<()>(conn))?;
        Ok(())
    }

    fn restore_state(
        &self,
        proposal: &ProposalId,
        state: &ProposalState,
    ) -> Result<(), StoreError> {
        let mut pipe = redis::pipe();
        if !state.votes.is_empty() {
            let cmd = pipe.cmd("HSET").arg(keys::votes(proposal));
            for (wallet, option) in &state.votes {
                cmd.arg(wallet.as_str()).arg(*option);
            }
            cmd.ignore();
        }
        if !state.delegations.is_empty() {
            let cmd = pipe.cmd("HSET").arg(keys::delegations(proposal));
            for (from, to) in &state.delegations {
                cmd.arg(from.as_str()).arg(to.as_str());
            }
            cmd.ignore();
        }
        if !state.participants.is_empty() {
            let cmd = pipe.cmd("SADD").arg(keys::participants(proposal));
            for wallet in &state.participants {
                cmd.arg(wallet.as_str());
            }
            cmd.ignore();
        }
        if let Some(status) = &state.status {
            pipe.cmd("SET").arg(keys::status(proposal)).arg(status).ignore();
        }
        if let Some(deadline) = state.deadline {
            pipe.cmd("SET")
                .arg(keys::deadline(proposal))
                .arg(deadline.to_iso8601())
                .ignore();
        }
        self.run_pipeline(&pipe)
    }

    fn expire_proposal(&self, proposal: &ProposalId, ttl_secs: u64) -> Result<(), StoreError> {
        let mut pipe = redis::pipe();
        for key in keys::proposal_keys(proposal) {
            pipe.cmd("EXPIRE").arg(key).arg(ttl_secs).ignore();
        }
        self.run_pipeline(&pipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Live tests run only when `LIQUID_TEST_REDIS_URL` points at a scratch
    /// Redis database; they flush nothing but the keys of their proposal.
    fn live_store() -> Option<RedisVotingStore> {
        let url = std::env::var("LIQUID_TEST_REDIS_URL").ok()?;
        let store = RedisVotingStore::open(&url).ok()?;
        store.ping().ok()?;
        Some(store)
    }

    #[test]
    fn option_parse_rejects_garbage() {
        assert_eq!(parse_option("k", "3").unwrap(), 3);
        assert!(matches!(
            parse_option("k", "three"),
            Err(RedisStoreError::Malformed { .. })
        ));
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(RedisVotingStore::open("not a url").is_err());
    }

    #[test]
    fn unreachable_server_is_unavailable() {
        let store = RedisVotingStore::open("redis://127.0.0.1:1/")
            .unwrap()
            .with_connect_timeout(Duration::from_millis(200));
        let err = store.get_status(&ProposalId::new("p")).unwrap_err();
        assert!(err.is_unavailable(), "{err:?}");
    }

    #[test]
    fn silent_server_times_out_as_unavailable() {
        // Accepts the TCP connection but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let store = RedisVotingStore::open(&format!("redis://127.0.0.1:{port}/"))
            .unwrap()
            .with_connect_timeout(Duration::from_millis(500))
            .with_io_timeout(Duration::from_millis(200));

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(store.get_status(&ProposalId::new("p")));
        });
        let result = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("store call did not time out");
        let err = result.unwrap_err();
        assert!(err.is_unavailable(), "{err:?}");
        drop(listener);
    }

    #[test]
    fn live_vote_delegate_roundtrip() {
        let Some(store) = live_store() else {
            return;
        };
        let p = ProposalId::new("redis-live-test");
        let a = WalletAddress::new("a");
        let b = WalletAddress::new("b");
        store.clear_proposal(&p).unwrap();

        store.cast_vote(&p, &a, 2).unwrap();
        let once = store.capture_state(&p).unwrap();
        store.cast_vote(&p, &a, 2).unwrap();
        assert_eq!(store.capture_state(&p).unwrap(), once);
        assert_eq!(once.participants.len(), 1);
        assert!(once.delegations.is_empty());

        store.set_delegation(&p, &a, &b).unwrap();
        let status = store.wallet_status(&p, &a).unwrap();
        assert_eq!(status.vote, None);
        assert_eq!(status.delegate, Some(b.clone()));
        assert!(status.is_participant);

        store.set_deadline(&p, Timestamp::new(1_700_000_000)).unwrap();
        let state = store.capture_state(&p).unwrap();
        store.clear_proposal(&p).unwrap();
        assert!(store.capture_state(&p).unwrap().is_empty());
        store.restore_state(&p, &state).unwrap();
        assert_eq!(store.capture_state(&p).unwrap(), state);

        assert!(store.try_acquire_lock(&p, "me", 30).unwrap());
        assert!(!store.try_acquire_lock(&p, "you", 30).unwrap());
        store.release_lock(&p, "you").unwrap();
        assert!(!store.try_acquire_lock(&p, "you", 30).unwrap());
        store.release_lock(&p, "me").unwrap();
        assert!(store.try_acquire_lock(&p, "you", 30).unwrap());
        store.clear_proposal(&p).unwrap();
    }
}

//! Raft log storage backed by sled, adapted from the teacher's
//! `SledRaftLogStorage` (spec says nothing about log storage internals; this
//! is pure ambient plumbing the gateway needs to run openraft at all).

use std::fmt::Debug;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use anyerror::AnyError;
use openraft::storage::{LogFlushed, RaftLogReader, RaftLogStorage};
use openraft::{Entry, LogId, LogState, OptionalSend, StorageError, StorageIOError, Vote};
use parking_lot::RwLock;
use sled::{Db, Tree};

use crate::error::GatewayError;
use crate::types::{NodeId, TypeConfig};

const RAFT_LOG_TREE: &str = "raft_log";
const RAFT_VOTE_TREE: &str = "raft_vote";
const RAFT_STATE_TREE: &str = "raft_state";
const KEY_LAST_PURGED: &[u8] = b"last_purged_log_id";

/// Raft log storage keyed by big-endian log index, mirroring the teacher's
/// `ormdb-raft` sled layout.
pub struct SledRaftLogStorage {
    db: Arc<Db>,
    log_tree: Tree,
    vote_tree: Tree,
    state_tree: Tree,
    last_purged: RwLock<Option<LogId<NodeId>>>,
}

impl SledRaftLogStorage {
    pub fn open(db: Arc<Db>) -> Result<Self, GatewayError> {
        let log_tree = db.open_tree(RAFT_LOG_TREE)?;
        let vote_tree = db.open_tree(RAFT_VOTE_TREE)?;
        let state_tree = db.open_tree(RAFT_STATE_TREE)?;
        let last_purged = Self::load_last_purged(&state_tree)?;

        Ok(Self {
            db,
            log_tree,
            vote_tree,
            state_tree,
            last_purged: RwLock::new(last_purged),
        })
    }

    fn log_key(index: u64) -> [u8; 8] {
        index.to_be_bytes()
    }

    fn load_last_purged(state_tree: &Tree) -> Result<Option<LogId<NodeId>>, GatewayError> {
        match state_tree.get(KEY_LAST_PURGED)? {
            Some(bytes) => {
                let log_id = serde_json::from_slice(&bytes)
                    .map_err(|e| GatewayError::Storage(e.to_string()))?;
                Ok(Some(log_id))
            }
            None => Ok(None),
        }
    }

    fn save_last_purged(&self, log_id: LogId<NodeId>) -> Result<(), GatewayError> {
        let bytes =
            serde_json::to_vec(&log_id).map_err(|e| GatewayError::Serialization(e.to_string()))?;
        self.state_tree.insert(KEY_LAST_PURGED, bytes)?;
        *self.last_purged.write() = Some(log_id);
        Ok(())
    }

    fn get_last_log_id(&self) -> Result<Option<LogId<NodeId>>, GatewayError> {
        match self.log_tree.last()? {
            Some((_, value)) => {
                let entry: Entry<TypeConfig> = serde_json::from_slice(&value)
                    .map_err(|e| GatewayError::Storage(e.to_string()))?;
                Ok(Some(entry.log_id))
            }
            None => Ok(None),
        }
    }

    fn serialize_entry(entry: &Entry<TypeConfig>) -> Result<Vec<u8>, GatewayError> {
        serde_json::to_vec(entry).map_err(|e| GatewayError::Serialization(e.to_string()))
    }

    fn deserialize_entry(bytes: &[u8]) -> Result<Entry<TypeConfig>, GatewayError> {
        serde_json::from_slice(bytes).map_err(|e| GatewayError::Storage(e.to_string()))
    }
}

impl RaftLogReader<TypeConfig> for SledRaftLogStorage {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let start = match range.start_bound() {
            Bound::Included(&i) => Self::log_key(i),
            Bound::Excluded(&i) => Self::log_key(i.saturating_add(1)),
            Bound::Unbounded => Self::log_key(0),
        };
        let end = match range.end_bound() {
            Bound::Included(&i) => Some(Self::log_key(i.saturating_add(1))),
            Bound::Excluded(&i) => Some(Self::log_key(i)),
            Bound::Unbounded => None,
        };

        let iter = if let Some(end_key) = end {
            self.log_tree.range(start..end_key)
        } else {
            self.log_tree.range(start..)
        };

        let mut entries = Vec::new();
        for result in iter {
            let (_, value) = result.map_err(|e| StorageIOError::read_logs(AnyError::new(&e)))?;
            let entry = Self::deserialize_entry(&value)
                .map_err(|e| StorageIOError::read_logs(AnyError::new(&e)))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

impl RaftLogStorage<TypeConfig> for SledRaftLogStorage {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let last_purged = *self.last_purged.read();
        let last_log_id = self
            .get_last_log_id()
            .map_err(|e| StorageIOError::read_logs(AnyError::new(&e)))?;
        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        Self {
            db: self.db.clone(),
            log_tree: self.log_tree.clone(),
            vote_tree: self.vote_tree.clone(),
            state_tree: self.state_tree.clone(),
            last_purged: RwLock::new(*self.last_purged.read()),
        }
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        let bytes = serde_json::to_vec(vote).map_err(|e| StorageIOError::write_vote(AnyError::new(&e)))?;
        self.vote_tree
            .insert(b"vote", bytes)
            .map_err(|e| StorageIOError::write_vote(AnyError::new(&e)))?;
        self.vote_tree
            .flush()
            .map_err(|e| StorageIOError::write_vote(AnyError::new(&e)))?;
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        match self
            .vote_tree
            .get(b"vote")
            .map_err(|e| StorageIOError::read_vote(AnyError::new(&e)))?
        {
            Some(bytes) => {
                let vote = serde_json::from_slice(&bytes)
                    .map_err(|e| StorageIOError::read_vote(AnyError::new(&e)))?;
                Ok(Some(vote))
            }
            None => Ok(None),
        }
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
        I::IntoIter: Send,
    {
        for entry in entries {
            let key = Self::log_key(entry.log_id.index);
            let value = Self::serialize_entry(&entry)
                .map_err(|e| StorageIOError::write_logs(AnyError::new(&e)))?;
            self.log_tree
                .insert(key, value)
                .map_err(|e| StorageIOError::write_logs(AnyError::new(&e)))?;
        }
        self.log_tree
            .flush()
            .map_err(|e| StorageIOError::write_logs(AnyError::new(&e)))?;
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let start_key = Self::log_key(log_id.index);
        let keys: Vec<_> = self
            .log_tree
            .range(start_key..)
            .filter_map(|r| r.ok().map(|(k, _)| k))
            .collect();
        for key in keys {
            self.log_tree
                .remove(key)
                .map_err(|e| StorageIOError::write_logs(AnyError::new(&e)))?;
        }
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let end_key = Self::log_key(log_id.index.saturating_add(1));
        let keys: Vec<_> = self
            .log_tree
            .range(..end_key)
            .filter_map(|r| r.ok().map(|(k, _)| k))
            .collect();
        for key in keys {
            self.log_tree
                .remove(key)
                .map_err(|e| StorageIOError::write_logs(AnyError::new(&e)))?;
        }
        self.save_last_purged(log_id)
            .map_err(|e| StorageIOError::write_logs(AnyError::new(&e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::EntryPayload;

    fn entry(index: u64, term: u64) -> Entry<TypeConfig> {
        Entry {
            log_id: LogId::new(openraft::CommittedLeaderId::new(term, 1), index),
            payload: EntryPayload::Normal(crate::types::SqlCommand::noop()),
        }
    }

    fn insert_directly(storage: &SledRaftLogStorage, entries: &[Entry<TypeConfig>]) {
        for e in entries {
            let key = SledRaftLogStorage::log_key(e.log_id.index);
            let value = SledRaftLogStorage::serialize_entry(e).unwrap();
            storage.log_tree.insert(key, value).unwrap();
        }
        storage.log_tree.flush().unwrap();
    }

    #[tokio::test]
    async fn insert_and_read_range() {
        let db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        let mut storage = SledRaftLogStorage::open(db).unwrap();
        insert_directly(&storage, &[entry(1, 1), entry(2, 1), entry(3, 1)]);

        let entries = storage.try_get_log_entries(1..4).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].log_id.index, 3);
    }

    #[tokio::test]
    async fn purge_removes_up_to_and_including() {
        let db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        let mut storage = SledRaftLogStorage::open(db).unwrap();
        insert_directly(&storage, &[entry(1, 1), entry(2, 1), entry(3, 1), entry(4, 1)]);

        let log_id = LogId::new(openraft::CommittedLeaderId::new(1, 1), 2);
        storage.purge(log_id).await.unwrap();

        let entries = storage.try_get_log_entries(1..).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].log_id.index, 3);

        let state = storage.get_log_state().await.unwrap();
        assert_eq!(state.last_purged_log_id, Some(log_id));
    }

    #[tokio::test]
    async fn vote_persists_across_reopen() {
        let db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        let mut storage = SledRaftLogStorage::open(db.clone()).unwrap();
        assert!(storage.read_vote().await.unwrap().is_none());

        let vote = Vote::new(1, 5);
        storage.save_vote(&vote).await.unwrap();
        drop(storage);

        let mut reopened = SledRaftLogStorage::open(db).unwrap();
        assert_eq!(reopened.read_vote().await.unwrap(), Some(vote));
    }
}

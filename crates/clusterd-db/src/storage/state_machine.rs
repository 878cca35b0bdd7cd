//! Raft state machine that applies replicated SQL batches to the embedded
//! database, adapted from the teacher's `OrmdbStateMachine`. Where the
//! teacher dispatches into `ormdb-core::storage::StorageEngine`, this one
//! executes SQL text directly against a `rusqlite::Connection`, and where
//! the teacher snapshots its sled trees this one checkpoints the WAL and
//! copies the SQLite file bytes (spec §4.3's `Dump`/`Replace` semantics
//! plus §4.4's install-snapshot path).

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use anyerror::AnyError;
use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine, Snapshot};
use openraft::{Entry, EntryPayload, LogId, OptionalSend, StorageError, StorageIOError};
use parking_lot::{Mutex, RwLock};
use sled::{Db, Tree};

use crate::error::GatewayError;
use crate::types::{
    Membership, NodeId, SnapshotMeta, SqlCommand, SqlOutcome, StoredMembership, TypeConfig,
};

const SM_STATE_TREE: &str = "raft_sm_state";
const KEY_LAST_APPLIED: &[u8] = b"last_applied";
const KEY_MEMBERSHIP: &[u8] = b"membership";

pub struct SqlStateMachine {
    conn: Arc<Mutex<rusqlite::Connection>>,
    db_path: PathBuf,
    db: Arc<Db>,
    state_tree: Tree,
    last_applied: RwLock<Option<LogId<NodeId>>>,
    membership: RwLock<StoredMembership>,
}

impl SqlStateMachine {
    pub fn new(
        conn: Arc<Mutex<rusqlite::Connection>>,
        db_path: PathBuf,
        db: Arc<Db>,
    ) -> Result<Self, GatewayError> {
        let state_tree = db.open_tree(SM_STATE_TREE)?;
        let last_applied = Self::load_last_applied(&state_tree)?;
        let membership = Self::load_membership(&state_tree)?;

        Ok(Self {
            conn,
            db_path,
            db,
            state_tree,
            last_applied: RwLock::new(last_applied),
            membership: RwLock::new(membership),
        })
    }

    fn load_last_applied(state_tree: &Tree) -> Result<Option<LogId<NodeId>>, GatewayError> {
        match state_tree.get(KEY_LAST_APPLIED)? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| GatewayError::Storage(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn load_membership(state_tree: &Tree) -> Result<StoredMembership, GatewayError> {
        match state_tree.get(KEY_MEMBERSHIP)? {
            Some(bytes) => {
                Ok(serde_json::from_slice(&bytes).map_err(|e| GatewayError::Storage(e.to_string()))?)
            }
            None => Ok(StoredMembership::new(None, Membership::new(vec![], None))),
        }
    }

    fn persist_state(&self) -> Result<(), GatewayError> {
        if let Some(log_id) = *self.last_applied.read() {
            let bytes =
                serde_json::to_vec(&log_id).map_err(|e| GatewayError::Serialization(e.to_string()))?;
            self.state_tree.insert(KEY_LAST_APPLIED, bytes)?;
        }
        let membership = self.membership.read().clone();
        let bytes =
            serde_json::to_vec(&membership).map_err(|e| GatewayError::Serialization(e.to_string()))?;
        self.state_tree.insert(KEY_MEMBERSHIP, bytes)?;
        self.state_tree.flush()?;
        Ok(())
    }

    fn apply_command(&self, command: &SqlCommand) -> SqlOutcome {
        match command {
            SqlCommand::Noop => SqlOutcome::NoopApplied,
            SqlCommand::Exec { statements } => {
                let mut guard = self.conn.lock();
                let tx = match guard.transaction() {
                    Ok(tx) => tx,
                    Err(e) => return SqlOutcome::Failed { message: e.to_string() },
                };
                let mut rows_affected = 0u64;
                for stmt in statements {
                    match tx.execute(stmt, []) {
                        Ok(n) => rows_affected = n as u64,
                        Err(e) => {
                            return SqlOutcome::Failed { message: e.to_string() };
                        }
                    }
                }
                if let Err(e) = tx.commit() {
                    return SqlOutcome::Failed { message: e.to_string() };
                }
                SqlOutcome::Applied {
                    statements: statements.len(),
                    rows_affected,
                }
            }
        }
    }

    pub fn last_applied(&self) -> Option<LogId<NodeId>> {
        *self.last_applied.read()
    }

    pub fn membership(&self) -> StoredMembership {
        self.membership.read().clone()
    }

    /// Checkpoint the WAL and return the raw database file bytes, used both
    /// for `RaftSnapshotBuilder` and for seeding a freshly-joined peer.
    pub fn checkpoint_bytes(&self) -> Result<Vec<u8>, GatewayError> {
        {
            let guard = self.conn.lock();
            guard.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        Ok(std::fs::read(&self.db_path)?)
    }

    fn restore_from_bytes(&self, data: &[u8]) -> Result<(), GatewayError> {
        if data.is_empty() {
            return Ok(());
        }
        let guard = self.conn.lock();
        drop(guard);
        std::fs::write(&self.db_path, data)?;
        Ok(())
    }
}

impl RaftSnapshotBuilder<TypeConfig> for SqlStateMachine {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let last_applied = *self.last_applied.read();
        let membership = self.membership.read().clone();
        let data = self
            .checkpoint_bytes()
            .map_err(|e| StorageIOError::read_state_machine(AnyError::new(&e)))?;

        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership: membership,
            snapshot_id: format!(
                "{}-{}",
                last_applied.map(|l| l.index).unwrap_or(0),
                uuid_like()
            ),
        };

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

/// Cheap snapshot-id suffix without pulling in a UUID crate the teacher
/// doesn't otherwise use.
fn uuid_like() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}")
}

impl RaftStateMachine<TypeConfig> for SqlStateMachine {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership), StorageError<NodeId>> {
        Ok((*self.last_applied.read(), self.membership.read().clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<SqlOutcome>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut responses = Vec::new();
        for entry in entries {
            *self.last_applied.write() = Some(entry.log_id);
            let response = match entry.payload {
                EntryPayload::Blank => SqlOutcome::NoopApplied,
                EntryPayload::Normal(command) => self.apply_command(&command),
                EntryPayload::Membership(membership) => {
                    *self.membership.write() = StoredMembership::new(Some(entry.log_id), membership);
                    SqlOutcome::NoopApplied
                }
            };
            responses.push(response);
        }
        self.persist_state()
            .map_err(|e| StorageIOError::write_state_machine(AnyError::new(&e)))?;
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        Self {
            conn: self.conn.clone(),
            db_path: self.db_path.clone(),
            db: self.db.clone(),
            state_tree: self.state_tree.clone(),
            last_applied: RwLock::new(*self.last_applied.read()),
            membership: RwLock::new(self.membership.read().clone()),
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        *self.last_applied.write() = meta.last_log_id;
        *self.membership.write() = meta.last_membership.clone();

        let data = snapshot.into_inner();
        self.restore_from_bytes(&data)
            .map_err(|e| StorageIOError::write_state_machine(AnyError::new(&e)))?;

        self.persist_state()
            .map_err(|e| StorageIOError::write_state_machine(AnyError::new(&e)))?;
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        if self.last_applied.read().is_none() {
            return Ok(None);
        }
        let mut builder = self.get_snapshot_builder().await;
        Ok(Some(builder.build_snapshot().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn machine() -> SqlStateMachine {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("db.sqlite3");
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);")
            .unwrap();
        let sled_db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        std::mem::forget(dir); // keep db_path alive for the test's lifetime
        SqlStateMachine::new(Arc::new(Mutex::new(conn)), db_path, sled_db).unwrap()
    }

    #[tokio::test]
    async fn apply_exec_runs_statements_and_persists_last_applied() {
        let mut sm = machine();
        let entry = Entry {
            log_id: LogId::new(openraft::CommittedLeaderId::new(1, 1), 1),
            payload: EntryPayload::Normal(SqlCommand::exec(vec![
                "INSERT INTO t (id, v) VALUES (1, 'a')".into(),
            ])),
        };
        let responses = sm.apply(vec![entry]).await.unwrap();
        assert_eq!(
            responses[0],
            SqlOutcome::Applied {
                statements: 1,
                rows_affected: 1
            }
        );
        assert_eq!(sm.last_applied().unwrap().index, 1);
    }

    #[tokio::test]
    async fn failed_statement_rolls_back_whole_batch() {
        let mut sm = machine();
        let entry = Entry {
            log_id: LogId::new(openraft::CommittedLeaderId::new(1, 1), 1),
            payload: EntryPayload::Normal(SqlCommand::exec(vec![
                "INSERT INTO t (id, v) VALUES (1, 'a')".into(),
                "INSERT INTO nonexistent_table VALUES (1)".into(),
            ])),
        };
        let responses = sm.apply(vec![entry]).await.unwrap();
        assert!(responses[0].is_failed());

        let guard = sm.conn.lock();
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}

//! Core type definitions for the openraft integration (spec §4.4).

use std::io::Cursor;

use openraft::BasicNode;
use serde::{Deserialize, Serialize};

/// Node identifier type. The spec keeps member identity as a name string
/// (see `clusterd_core::ClusterMember`); Raft itself needs a stable integral
/// ID, so the gateway derives one by hashing the member name once at join
/// time and never reassigns it afterward.
pub type NodeId = u64;

pub type ClusterRaft = openraft::Raft<TypeConfig>;
pub type LogEntry = openraft::Entry<TypeConfig>;
pub type LogId = openraft::LogId<NodeId>;
pub type Vote = openraft::Vote<NodeId>;
pub type Membership = openraft::Membership<NodeId, BasicNode>;
pub type StoredMembership = openraft::StoredMembership<NodeId, BasicNode>;
pub type SnapshotMeta = openraft::SnapshotMeta<NodeId, BasicNode>;

openraft::declare_raft_types!(
    pub TypeConfig:
        D = SqlCommand,
        R = SqlOutcome,
        NodeId = NodeId,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
);

/// One batch of SQL text replicated through the Raft log, as produced by a
/// `Transaction` call on the database gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlCommand {
    /// Statements executed together inside one SQLite transaction.
    Exec { statements: Vec<String> },
    /// Leadership confirmation no-op, committed once after each election.
    Noop,
}

impl SqlCommand {
    pub fn exec(statements: Vec<String>) -> Self {
        Self::Exec { statements }
    }

    pub fn noop() -> Self {
        Self::Noop
    }
}

/// Result of applying a `SqlCommand` to the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlOutcome {
    /// Number of statements executed and rows touched by the last one.
    Applied { statements: usize, rows_affected: u64 },
    NoopApplied,
    Failed { message: String },
}

impl SqlOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SqlOutcome::Failed { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            SqlOutcome::Failed { message } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_outcome_reports_failure() {
        let outcome = SqlOutcome::Failed {
            message: "disk full".into(),
        };
        assert!(outcome.is_failed());
        assert_eq!(outcome.error_message(), Some("disk full"));
    }

    #[test]
    fn sql_command_constructors() {
        let cmd = SqlCommand::exec(vec!["INSERT INTO t VALUES (1)".into()]);
        assert!(matches!(cmd, SqlCommand::Exec { .. }));
        assert_eq!(SqlCommand::noop(), SqlCommand::Noop);
    }
}

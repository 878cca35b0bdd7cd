//! Raft RPC message envelope carried over the framed dqlite connection,
//! adapted from the teacher's `ormdb-raft::network::messages` (same shape,
//! renamed for the SQL command/outcome types used here).

use openraft::{LogId, Vote};
use serde::{Deserialize, Serialize};

use crate::types::{LogEntry, NodeId, StoredMembership};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaftMessage {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
    InstallSnapshotRequest(InstallSnapshotRequest),
    InstallSnapshotResponse(InstallSnapshotResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub vote: Vote<NodeId>,
    pub last_log_id: Option<LogId<NodeId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub vote: Vote<NodeId>,
    pub vote_granted: bool,
    pub last_log_id: Option<LogId<NodeId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub vote: Vote<NodeId>,
    pub prev_log_id: Option<LogId<NodeId>>,
    pub entries: Vec<LogEntry>,
    pub leader_commit: Option<LogId<NodeId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub vote: Vote<NodeId>,
    pub success: bool,
    pub conflict: Option<LogId<NodeId>>,
}

impl AppendEntriesResponse {
    pub fn success(vote: Vote<NodeId>) -> Self {
        Self {
            vote,
            success: true,
            conflict: None,
        }
    }

    pub fn conflict(vote: Vote<NodeId>, conflict: Option<LogId<NodeId>>) -> Self {
        Self {
            vote,
            success: false,
            conflict,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub vote: Vote<NodeId>,
    pub meta: NetworkSnapshotMeta,
    pub offset: u64,
    pub data: Vec<u8>,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSnapshotMeta {
    pub last_log_id: Option<LogId<NodeId>>,
    pub last_membership: StoredMembership,
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub vote: Vote<NodeId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_request_roundtrips_through_json() {
        let vote = Vote::new(1, 5);
        let last_log_id = Some(LogId::new(openraft::CommittedLeaderId::new(1, 1), 10));
        let msg = RaftMessage::VoteRequest(VoteRequest { vote, last_log_id });

        let json = serde_json::to_string(&msg).unwrap();
        let back: RaftMessage = serde_json::from_str(&json).unwrap();
        match back {
            RaftMessage::VoteRequest(req) => {
                assert_eq!(req.vote, vote);
                assert_eq!(req.last_log_id, last_log_id);
            }
            _ => panic!("expected VoteRequest"),
        }
    }
}

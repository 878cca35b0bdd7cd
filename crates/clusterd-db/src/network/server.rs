//! Accept-side of the dqlite-upgraded connection: once `clusterd-net`'s
//! router has hijacked the HTTP connection and written the `101` response,
//! it hands the raw stream here to be served as one openraft RPC endpoint.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::GatewayError;
use crate::network::messages::{AppendEntriesResponse, InstallSnapshotResponse, RaftMessage, VoteResponse};
use crate::network::protocol::{read_frame, write_frame};
use crate::types::ClusterRaft;

/// Serves RPCs over `stream` until the peer disconnects or a protocol
/// error occurs. Each frame is one request; `clusterd-net`'s transport
/// dials fresh per RPC, so in practice this loop serves exactly one frame
/// before the peer closes, but it tolerates a peer that pipelines more.
pub async fn serve_connection<S>(mut stream: S, raft: ClusterRaft) -> Result<(), GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let message = match read_frame(&mut stream).await {
            Ok(m) => m,
            Err(_) => return Ok(()), // peer closed; not an error worth propagating
        };

        let response = dispatch(&raft, message).await;
        write_frame(&mut stream, &response).await?;
    }
}

async fn dispatch(raft: &ClusterRaft, message: RaftMessage) -> RaftMessage {
    match message {
        RaftMessage::VoteRequest(req) => {
            let rpc = openraft::raft::VoteRequest {
                vote: req.vote,
                last_log_id: req.last_log_id,
            };
            match raft.vote(rpc).await {
                Ok(resp) => RaftMessage::VoteResponse(VoteResponse {
                    vote: resp.vote,
                    vote_granted: resp.vote_granted,
                    last_log_id: resp.last_log_id,
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "vote rpc failed");
                    RaftMessage::VoteResponse(VoteResponse {
                        vote: req.vote,
                        vote_granted: false,
                        last_log_id: None,
                    })
                }
            }
        }
        RaftMessage::AppendEntriesRequest(req) => {
            let rpc = openraft::raft::AppendEntriesRequest {
                vote: req.vote,
                prev_log_id: req.prev_log_id,
                entries: req.entries,
                leader_commit: req.leader_commit,
            };
            match raft.append_entries(rpc).await {
                Ok(openraft::raft::AppendEntriesResponse::Success) => {
                    RaftMessage::AppendEntriesResponse(AppendEntriesResponse::success(req.vote))
                }
                Ok(openraft::raft::AppendEntriesResponse::Conflict) => {
                    RaftMessage::AppendEntriesResponse(AppendEntriesResponse::conflict(req.vote, None))
                }
                Ok(openraft::raft::AppendEntriesResponse::HigherVote(vote)) => {
                    RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
                        vote,
                        success: false,
                        conflict: None,
                    })
                }
                Err(e) => {
                    tracing::warn!(error = %e, "append_entries failed");
                    RaftMessage::AppendEntriesResponse(AppendEntriesResponse::conflict(req.vote, None))
                }
            }
        }
        RaftMessage::InstallSnapshotRequest(req) => {
            let meta = openraft::SnapshotMeta {
                last_log_id: req.meta.last_log_id,
                last_membership: req.meta.last_membership,
                snapshot_id: req.meta.snapshot_id,
            };
            let rpc = openraft::raft::InstallSnapshotRequest {
                vote: req.vote,
                meta,
                offset: req.offset,
                data: req.data,
                done: req.done,
            };
            match raft.install_snapshot(rpc).await {
                Ok(resp) => RaftMessage::InstallSnapshotResponse(InstallSnapshotResponse { vote: resp.vote }),
                Err(e) => {
                    tracing::warn!(error = %e, "install_snapshot failed");
                    RaftMessage::InstallSnapshotResponse(InstallSnapshotResponse { vote: req.vote })
                }
            }
        }
        other @ (RaftMessage::VoteResponse(_)
        | RaftMessage::AppendEntriesResponse(_)
        | RaftMessage::InstallSnapshotResponse(_)) => {
            tracing::warn!("received a response-shaped message as a request; dropping");
            other
        }
    }
}

//! TLS-dialing Raft transport over the dqlite-upgraded connection,
//! adapted from the teacher's `NngRaftNetwork` (same RPC shape, NNG socket
//! swapped for a mutual-TLS TCP stream per spec §4.4/§4.8).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use openraft::error::{NetworkError, RPCError, RaftError, ReplicationClosed, Unreachable};
use openraft::network::{RPCOption, RaftNetwork};
use openraft::raft::{
    AppendEntriesRequest as OAppendRequest, AppendEntriesResponse as OAppendResponse,
    InstallSnapshotRequest as OInstallRequest, InstallSnapshotResponse as OInstallResponse,
    SnapshotResponse, VoteRequest as OVoteRequest, VoteResponse as OVoteResponse,
};
use openraft::storage::Snapshot;
use openraft::{BasicNode, Vote};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::GatewayError;
use crate::network::messages::{
    AppendEntriesRequest, InstallSnapshotRequest, NetworkSnapshotMeta, RaftMessage, VoteRequest,
};
use crate::network::protocol;
use crate::types::{NodeId, TypeConfig};

/// Dials one peer over mutual TLS, performs the dqlite upgrade handshake,
/// and carries one openraft RPC per connection.
pub struct DqliteRaftNetwork {
    target: BasicNode,
    pub target_id: NodeId,
    tls_connector: Arc<TlsConnector>,
    dial_timeout: Duration,
}

impl DqliteRaftNetwork {
    pub fn new(
        target_id: NodeId,
        target: BasicNode,
        tls_config: Arc<rustls::ClientConfig>,
        dial_timeout: Duration,
    ) -> Self {
        Self {
            target,
            target_id,
            tls_connector: Arc::new(TlsConnector::from(tls_config)),
            dial_timeout,
        }
    }

    async fn roundtrip(&self, message: RaftMessage) -> Result<RaftMessage, GatewayError> {
        let (host, _) = self
            .target
            .addr
            .rsplit_once(':')
            .unwrap_or((self.target.addr.as_str(), "443"));

        let connect = async {
            let tcp = TcpStream::connect(&self.target.addr)
                .await
                .map_err(|e| GatewayError::Network(e.to_string()))?;
            let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
                .map_err(|e| GatewayError::Network(e.to_string()))?;
            let mut tls = self
                .tls_connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| GatewayError::Network(e.to_string()))?;

            protocol::client_handshake(&mut tls, "/database", host).await?;
            protocol::write_frame(&mut tls, &message).await?;
            let response = protocol::read_frame(&mut tls).await?;
            Ok::<_, GatewayError>(response)
        };

        tokio::time::timeout(self.dial_timeout, connect)
            .await
            .map_err(|_| GatewayError::Timeout(format!("dial to node {} timed out", self.target_id)))?
    }
}

fn unreachable<E>(target_id: NodeId, err: &GatewayError) -> RPCError<NodeId, BasicNode, RaftError<NodeId, E>> {
    tracing::warn!(target_id, error = %err, "raft rpc unreachable");
    RPCError::Unreachable(Unreachable::new(err))
}

impl RaftNetwork<TypeConfig> for DqliteRaftNetwork {
    async fn vote(
        &mut self,
        rpc: OVoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<OVoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        let msg = RaftMessage::VoteRequest(VoteRequest {
            vote: rpc.vote,
            last_log_id: rpc.last_log_id,
        });
        match self.roundtrip(msg).await {
            Ok(RaftMessage::VoteResponse(resp)) => Ok(OVoteResponse {
                vote: resp.vote,
                vote_granted: resp.vote_granted,
                last_log_id: resp.last_log_id,
            }),
            Ok(_) => Err(RPCError::Network(NetworkError::new(&std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unexpected response variant",
            )))),
            Err(e) => Err(unreachable(self.target_id, &e)),
        }
    }

    async fn append_entries(
        &mut self,
        rpc: OAppendRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<OAppendResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        let msg = RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
            vote: rpc.vote,
            prev_log_id: rpc.prev_log_id,
            entries: rpc.entries,
            leader_commit: rpc.leader_commit,
        });
        match self.roundtrip(msg).await {
            Ok(RaftMessage::AppendEntriesResponse(resp)) => {
                if resp.success {
                    Ok(OAppendResponse::Success)
                } else if resp.conflict.is_some() {
                    Ok(OAppendResponse::Conflict)
                } else {
                    Ok(OAppendResponse::HigherVote(resp.vote))
                }
            }
            Ok(_) => Err(RPCError::Network(NetworkError::new(&std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unexpected response variant",
            )))),
            Err(e) => Err(unreachable(self.target_id, &e)),
        }
    }

    async fn install_snapshot(
        &mut self,
        rpc: OInstallRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<OInstallResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId, openraft::error::InstallSnapshotError>>>
    {
        let meta = NetworkSnapshotMeta {
            last_log_id: rpc.meta.last_log_id,
            last_membership: rpc.meta.last_membership.clone(),
            snapshot_id: rpc.meta.snapshot_id.clone(),
        };
        let msg = RaftMessage::InstallSnapshotRequest(InstallSnapshotRequest {
            vote: rpc.vote,
            meta,
            offset: rpc.offset,
            data: rpc.data.clone(),
            done: rpc.done,
        });
        match self.roundtrip(msg).await {
            Ok(RaftMessage::InstallSnapshotResponse(resp)) => Ok(OInstallResponse { vote: resp.vote }),
            Ok(_) => Err(RPCError::Network(NetworkError::new(&std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unexpected response variant",
            )))),
            Err(e) => Err(unreachable(self.target_id, &e)),
        }
    }

    async fn full_snapshot(
        &mut self,
        vote: Vote<NodeId>,
        snapshot: Snapshot<TypeConfig>,
        _cancel: impl Future<Output = ReplicationClosed> + Send + 'static,
        _option: RPCOption,
    ) -> Result<SnapshotResponse<NodeId>, openraft::error::StreamingError<TypeConfig, openraft::error::Fatal<NodeId>>>
    {
        let meta = NetworkSnapshotMeta {
            last_log_id: snapshot.meta.last_log_id,
            last_membership: snapshot.meta.last_membership.clone(),
            snapshot_id: snapshot.meta.snapshot_id.clone(),
        };
        let data = snapshot.snapshot.into_inner();
        const CHUNK: usize = 1024 * 1024;

        for (i, chunk) in data.chunks(CHUNK).enumerate() {
            let is_last = (i + 1) * CHUNK >= data.len();
            let msg = RaftMessage::InstallSnapshotRequest(InstallSnapshotRequest {
                vote,
                meta: meta.clone(),
                offset: (i * CHUNK) as u64,
                data: chunk.to_vec(),
                done: is_last,
            });
            match self.roundtrip(msg).await {
                Ok(RaftMessage::InstallSnapshotResponse(_)) => {}
                Ok(_) => {
                    return Err(openraft::error::StreamingError::Network(NetworkError::new(
                        &std::io::Error::new(std::io::ErrorKind::InvalidData, "unexpected response variant"),
                    )));
                }
                Err(e) => {
                    return Err(openraft::error::StreamingError::Unreachable(Unreachable::new(&e)));
                }
            }
        }

        Ok(SnapshotResponse { vote })
    }
}

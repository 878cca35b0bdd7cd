//! Factory for dqlite-upgraded Raft network connections, adapted from the
//! teacher's `NngNetworkFactory`.

use std::sync::Arc;
use std::time::Duration;

use openraft::network::RaftNetworkFactory;
use openraft::BasicNode;

use crate::network::transport::DqliteRaftNetwork;
use crate::types::{NodeId, TypeConfig};

pub struct DqliteNetworkFactory {
    node_id: NodeId,
    tls_config: Arc<rustls::ClientConfig>,
    dial_timeout: Duration,
}

impl DqliteNetworkFactory {
    pub fn new(node_id: NodeId, tls_config: Arc<rustls::ClientConfig>, dial_timeout: Duration) -> Self {
        Self {
            node_id,
            tls_config,
            dial_timeout,
        }
    }
}

impl RaftNetworkFactory<TypeConfig> for DqliteNetworkFactory {
    type Network = DqliteRaftNetwork;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        tracing::debug!(from = self.node_id, to = target, addr = %node.addr, "dialing peer");
        DqliteRaftNetwork::new(target, node.clone(), self.tls_config.clone(), self.dial_timeout)
    }
}

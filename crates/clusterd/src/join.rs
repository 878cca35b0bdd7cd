//! Join via token (spec §4.6), both halves: the joiner's client-side
//! dial-and-attach sequence and the leader's validate-and-admit logic the
//! contacted peer forwards to.

use std::sync::Arc;

use clusterd_core::{
    certificate_has_san, CapabilityVector, ClusterMember, DaemonError, KeyPair, Result,
};
use clusterd_schema::Migration;
use clusterd_trust::Remote;
use serde::{Deserialize, Serialize};

use crate::daemon::{node_id_for, Daemon};
use crate::token::JoinToken;

/// The draft `ClusterMember` a joiner POSTs to `/cluster` (spec §4.6 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterJoinRequest {
    pub name: String,
    pub address: String,
    pub certificate: String,
    pub schema_internal: u64,
    pub schema_external: u64,
    pub api_extensions: Vec<String>,
    pub secret: String,
}

/// The leader's reply (spec §4.6 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterJoinResponse {
    pub cluster_cert: String,
    pub cluster_key: String,
    pub members: Vec<ClusterMember>,
    pub additional_certs: Vec<String>,
    pub trusted_member: String,
}

impl Daemon {
    /// Validates an inbound join request and admits the joiner (spec §4.6
    /// step 3). Only ever called on the leader; a non-leader that receives
    /// the POST forwards it first (see `clusterd-net`'s proxy machinery and
    /// the handler that calls this).
    pub async fn admit_join(&self, request: &ClusterJoinRequest) -> Result<ClusterJoinResponse> {
        let (member, members) = {
            let conn = self.conn.lock();

            let now = crate::heartbeat::now_unix();
            self.member_store.reap_if_expired(&conn, &request.name, now)?;
            let token = self
                .member_store
                .find_token(&conn, &request.name)?
                .ok_or_else(|| DaemonError::Forbidden(format!("no join token issued for {}", request.name)))?;

            if token.secret != request.secret {
                return Err(DaemonError::Forbidden("join secret does not match the issued token".into()));
            }
            if !certificate_has_san(&request.certificate, &request.name)? {
                return Err(DaemonError::BadRequest(format!(
                    "certificate SAN does not contain {}",
                    request.name
                )));
            }
            if !self.schema_extensions.is_same_version(&request.api_extensions) {
                return Err(DaemonError::Conflict("api extension set does not match this cluster".into()));
            }

            let capabilities = CapabilityVector::new(request.schema_internal, request.schema_external, request.api_extensions.clone());
            let member = ClusterMember::pending(&request.name, &request.address, &request.certificate, capabilities);
            self.member_store.insert_pending(&conn, &member)?;
            self.member_store.delete_token(&conn, &request.name)?;

            let members = self.member_store.list(&conn)?;
            (member, members)
        };

        // Attach the joiner to Raft as a non-voting learner right away
        // (spec overview: "automatic leader-driven role assignment"); the
        // heartbeat engine promotes it to voter once it shows up in the
        // Raft membership view (`promote_attached_learners`).
        if let Some(gateway) = self.gateway() {
            gateway.add_learner(node_id_for(&request.name), request.address.clone()).await?;
        }

        let cluster = self
            .cluster_identity
            .lock()
            .clone()
            .ok_or_else(|| DaemonError::Fatal("cluster identity not yet established".into()))?;

        self.hooks.run_on_new_member(member.clone());
        self.fan_out_new_member(&member).await;

        Ok(ClusterJoinResponse {
            cluster_cert: cluster.cert_pem,
            cluster_key: cluster.key_pem,
            members,
            additional_certs: Vec::new(),
            trusted_member: self.name(),
        })
    }

    /// Fans `OnNewMember` out to every already-attached peer (spec §4.6
    /// step 6: "existing members run `OnNewMember(joiner)`"), mirroring
    /// `remove.rs`'s `fan_out_post_remove` ad-hoc hooks protocol.
    async fn fan_out_new_member(&self, member: &ClusterMember) {
        let peers = {
            let conn = self.conn.lock();
            match self.member_store.list(&conn) {
                Ok(m) => m,
                Err(_) => return,
            }
        };
        let client = match clusterd_net::build_proxy_client(&self.identity, self.truststore.clone()) {
            Ok(c) => c,
            Err(_) => return,
        };
        for peer in peers.iter().filter(|p| p.role.is_attached() && p.name != member.name) {
            let url = format!("https://{}/cluster/internal/hooks", peer.address);
            let body = serde_json::json!({"event": "new-member", "member": member.name});
            let _ = client.post(&url).json(&body).send().await;
        }
    }

    /// Attaches this node to an existing cluster using a join token (spec
    /// §4.6 Join via token). `own_address` is this node's own advertised
    /// address, handed out to the leader and to every peer's truststore.
    pub async fn join(
        self: &Arc<Self>,
        token: &str,
        own_address: &str,
        external_migrations: Vec<Migration>,
    ) -> Result<()> {
        let name = self.name();
        self.hooks.run_pre_join()?;

        let decoded = JoinToken::decode(token)?;
        if decoded.name != name {
            return Err(DaemonError::BadRequest(format!(
                "join token is for {} but this daemon is named {}",
                decoded.name, name
            )));
        }

        let schema = self.schema_manager(external_migrations);
        let capabilities = self.capability_vector(&schema);
        let request = ClusterJoinRequest {
            name: name.clone(),
            address: own_address.to_string(),
            certificate: self.identity.cert_pem.clone(),
            schema_internal: capabilities.schema_internal,
            schema_external: capabilities.schema_external,
            api_extensions: capabilities.api_extensions.clone(),
            secret: decoded.secret.clone(),
        };

        let outcome = self.dial_join_addresses(&decoded, &request).await;
        let (response, trusted_addr) = match outcome {
            Ok(found) => found,
            Err(e) => {
                self.revert_failed_join(&name, None).await;
                return Err(e);
            }
        };

        if let Err(e) = self.finish_join(&response, &request, own_address, schema).await {
            self.revert_failed_join(&name, Some(&trusted_addr)).await;
            return Err(e);
        }

        self.hooks.run_post_join();
        self.start_network().await?;
        Ok(())
    }

    /// Step 2: try every join address in turn, pinning the peer's
    /// certificate to the token's fingerprint before trusting anything it
    /// says.
    async fn dial_join_addresses(
        self: &Arc<Self>,
        decoded: &JoinToken,
        request: &ClusterJoinRequest,
    ) -> Result<(ClusterJoinResponse, String)> {
        let mut last_err = None;
        for addr in &decoded.join_addresses {
            match self.try_join_address(addr, decoded, request).await {
                Ok(response) => return Ok((response, addr.clone())),
                Err(e) => {
                    tracing::warn!(address = %addr, error = %e, "join address failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| DaemonError::Unavailable("no join addresses were reachable".into())))
    }

    async fn try_join_address(
        &self,
        addr: &str,
        decoded: &JoinToken,
        request: &ClusterJoinRequest,
    ) -> Result<ClusterJoinResponse> {
        let peer_cert = clusterd_net::fetch_peer_certificate(addr, &self.identity).await?;
        let fingerprint = clusterd_core::identity::fingerprint_pem(&peer_cert)?;
        if fingerprint != decoded.fingerprint {
            return Err(DaemonError::Forbidden(format!(
                "certificate at {addr} does not match the join token's fingerprint"
            )));
        }

        let client = clusterd_net::build_pinned_client(&peer_cert)?;
        let url = format!("https://{addr}/cluster/1.0/cluster");
        let response = client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| DaemonError::Unavailable(format!("join POST to {addr} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DaemonError::BadRequest(format!("join rejected by {addr}: {status} {body}")));
        }

        response
            .json::<ClusterJoinResponse>()
            .await
            .map_err(|e| DaemonError::Fatal(format!("invalid join response from {addr}: {e}")))
    }

    /// Steps 4: write the cluster identity, populate the truststore, then
    /// attach to Raft via the database gateway.
    async fn finish_join(
        self: &Arc<Self>,
        response: &ClusterJoinResponse,
        request: &ClusterJoinRequest,
        own_address: &str,
        schema: clusterd_schema::SchemaManager,
    ) -> Result<()> {
        let cluster_identity = KeyPair {
            cert_pem: response.cluster_cert.clone(),
            key_pem: response.cluster_key.clone(),
        };
        cluster_identity.write(&self.state_dir.cluster_cert(), &self.state_dir.cluster_key())?;
        *self.cluster_identity.lock() = Some(cluster_identity.clone());

        let remotes: Vec<Remote> = response
            .members
            .iter()
            .filter(|m| m.name != request.name)
            .map(|m| Remote::new(&m.name, &m.address, &m.certificate))
            .collect();
        if !remotes.is_empty() {
            self.truststore.add(remotes)?;
        }

        {
            let mut config = self.config.lock();
            config.name = request.name.clone();
            config.address = own_address.to_string();
            config.save(&self.state_dir)?;
        }

        let join_addresses: Vec<String> = response
            .members
            .iter()
            .filter(|m| m.name != request.name)
            .map(|m| m.address.clone())
            .collect();

        let (gateway, _accept_rx) = clusterd_db::DatabaseGateway::new(
            self.node_id(),
            self.gateway_config.clone(),
            schema,
            self.state_dir.database_file(),
            rusqlite::Connection::open(self.state_dir.database_file())
                .map_err(|e| DaemonError::Fatal(format!("failed to reopen database connection: {e}")))?,
            self.member_store.clone(),
            clusterd_net::build_client_config(&cluster_identity, self.truststore.clone())?,
        );

        gateway.join(own_address, &join_addresses, request.api_extensions.as_slice()).await?;
        *self.gateway.lock() = Some(gateway);
        Ok(())
    }

    /// Step 5: the reversion path on any join failure.
    async fn revert_failed_join(&self, name: &str, trusted_addr: Option<&str>) {
        if let Some(gateway) = self.gateway.lock().take() {
            let _ = gateway.stop().await;
        }
        if let Some(listeners) = self.listeners.lock().take() {
            listeners.stop().await;
        }
        let _ = std::fs::remove_dir_all(self.state_dir.root());

        if let Some(addr) = trusted_addr {
            let url = format!("https://{addr}/cluster/1.0/cluster/{name}?force=1");
            if let Ok(client) = clusterd_net::build_proxy_client(&self.identity, self.truststore.clone()) {
                let _ = client.delete(&url).send().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterd_schema::{Extensions, SchemaManager};

    fn conn_with_tables() -> rusqlite::Connection {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        let mgr = SchemaManager::new(crate::members::internal_migrations(), Vec::new(), Extensions::new());
        mgr.ensure(&mut conn, None).unwrap();
        conn
    }

    #[test]
    fn request_serializes_with_secret() {
        let req = ClusterJoinRequest {
            name: "c2".into(),
            address: "10.0.0.2:9000".into(),
            certificate: "PEM".into(),
            schema_internal: 1,
            schema_external: 1,
            api_extensions: vec![],
            secret: "s".repeat(32),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("secret"));
    }

    #[test]
    fn admission_rejects_unknown_token() {
        let conn = conn_with_tables();
        let store = crate::members::MemberStore::new("leader");
        let found = store.find_token(&conn, "nobody").unwrap();
        assert!(found.is_none());
    }
}

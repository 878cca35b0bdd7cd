//! Remove (spec §4.6): refusal conditions, the two-node leader-removal
//! promote-survivor step, self-removal mutex/leadership transfer, and the
//! survivor-leader execution sequence.

use clusterd_core::{DaemonError, MemberRole, Result};
use clusterd_db::NodeId;
use rand::seq::SliceRandom;

use crate::daemon::{node_id_for, Daemon};

impl Daemon {
    /// Removes `target_name` from the cluster, forwarding to the leader (or
    /// transferring leadership first, for self-removal) as needed.
    pub async fn remove_member(&self, target_name: &str, force: bool) -> Result<()> {
        let gateway = self.gateway().ok_or_else(|| DaemonError::Unavailable("database gateway not started".into()))?;

        let members = {
            let conn = self.conn.lock();
            self.member_store.list(&conn)?
        };
        let target = members
            .iter()
            .find(|m| m.name == target_name)
            .ok_or_else(|| DaemonError::NotFound(format!("unknown member {target_name}")))?
            .clone();

        let remaining_non_pending = members
            .iter()
            .filter(|m| m.name != target_name && m.role.is_attached())
            .count();
        if remaining_non_pending < 1 {
            return Err(DaemonError::Conflict("removing this member would leave no non-pending members".into()));
        }

        let voters = gateway.voter_addresses();
        if voters.len() < 2 {
            return Err(DaemonError::Conflict("removing this member would leave fewer than two Raft members".into()));
        }

        let own_name = self.name();

        if target_name == own_name {
            if gateway.is_leader() {
                let remaining: Vec<NodeId> = voters
                    .iter()
                    .map(|(id, _)| *id)
                    .filter(|id| *id != gateway.node_id())
                    .collect();
                let mut rng = rand::thread_rng();
                let successor = remaining
                    .choose(&mut rng)
                    .copied()
                    .ok_or_else(|| DaemonError::Conflict("no remaining voter to transfer leadership to".into()))?;
                gateway.relinquish_leadership(remaining).await?;

                let successor_addr = members
                    .iter()
                    .find(|m| node_id_for(&m.name) == successor)
                    .map(|m| m.address.clone())
                    .ok_or_else(|| DaemonError::Fatal("successor voter has no known address".into()))?;
                return self.forward_remove(&successor_addr, target_name, force).await;
            }

            let _guard = self.self_removal_mutex.lock().await;
            return self.remove_via_leader(&gateway, target_name, force).await;
        }

        self.remove_via_leader(&gateway, target_name, force).await
    }

    async fn remove_via_leader(&self, gateway: &clusterd_db::DatabaseGateway, target_name: &str, force: bool) -> Result<()> {
        if !gateway.is_leader() {
            let leader_addr = gateway
                .leader_address()
                .ok_or_else(|| DaemonError::Unavailable("cluster has no known leader".into()))?;
            return self.forward_remove(&leader_addr, target_name, force).await;
        }
        self.execute_remove_as_leader(gateway, target_name, force).await
    }

    /// Sequence on the survivor leader (spec §4.6 Remove, final bullet).
    async fn execute_remove_as_leader(&self, gateway: &clusterd_db::DatabaseGateway, target_name: &str, force: bool) -> Result<()> {
        let voters = gateway.voter_addresses();
        let target_id = node_id_for(target_name);

        if voters.len() == 2 {
            if let Some((survivor_id, _)) = voters.iter().find(|(id, _)| *id != target_id) {
                if let Some(survivor_name) = {
                    let conn = self.conn.lock();
                    self.member_store
                        .list(&conn)?
                        .into_iter()
                        .find(|m| node_id_for(&m.name) == *survivor_id)
                        .map(|m| m.name)
                } {
                    let conn = self.conn.lock();
                    self.member_store.update_role(&conn, &survivor_name, MemberRole::Voter)?;
                }
            }
        }

        if let Err(e) = self.hooks.run_pre_remove(target_name) {
            if !force {
                return Err(e);
            }
            tracing::warn!(member = %target_name, error = %e, "pre-remove hook failed, continuing because force=1");
        }

        let target_address = {
            let conn = self.conn.lock();
            let target = self.member_store.by_name(&conn, target_name)?;
            self.member_store.delete(&conn, target_name)?;
            target.map(|m| m.address)
        };

        let remaining_voters: Vec<NodeId> = voters.iter().map(|(id, _)| *id).filter(|id| *id != target_id).collect();
        if !remaining_voters.is_empty() {
            if let Err(e) = gateway.change_membership(remaining_voters).await {
                if !force {
                    return Err(e);
                }
                tracing::warn!(member = %target_name, error = %e, "raft membership change failed, continuing because force=1");
            }
        }

        if let Some(addr) = target_address {
            if let Err(e) = self.send_force_reset(&addr, target_name).await {
                if !force {
                    return Err(e);
                }
                tracing::warn!(member = %target_name, error = %e, "could not notify removed member, continuing because force=1");
            }
        }

        let _ = self.truststore.remove(target_name);

        self.hooks.run_post_remove(target_name);
        self.fan_out_post_remove(target_name).await;
        Ok(())
    }

    /// Forwards a remove request to another node (the leader, or a
    /// successor during a self-removal-while-leader leadership transfer).
    async fn forward_remove(&self, addr: &str, target_name: &str, force: bool) -> Result<()> {
        let client = clusterd_net::build_proxy_client(&self.identity, self.truststore.clone())?;
        let url = format!("https://{addr}/cluster/1.0/cluster/{target_name}?force={}", force as u8);
        let response = client
            .delete(&url)
            .send()
            .await
            .map_err(|e| DaemonError::Unavailable(format!("failed to forward removal to {addr}: {e}")))?;
        if !response.status().is_success() {
            return Err(DaemonError::Unavailable(format!("removal forwarded to {addr} failed: {}", response.status())));
        }
        Ok(())
    }

    /// Tells the removed member to drop itself from its own truststore and
    /// reset its state directory (spec: "`DELETE /truststore/<name>` and
    /// `PUT /cluster/<name>?force=1`" — folded into one wire call here since
    /// the target performs both steps locally when it receives it).
    async fn send_force_reset(&self, addr: &str, target_name: &str) -> Result<()> {
        let client = clusterd_net::build_proxy_client(&self.identity, self.truststore.clone())?;
        let url = format!("https://{addr}/cluster/1.0/cluster/{target_name}?force=1");
        let response = client
            .put(&url)
            .send()
            .await
            .map_err(|e| DaemonError::Unavailable(format!("failed to notify {addr} of its removal: {e}")))?;
        if !response.status().is_success() {
            return Err(DaemonError::Unavailable(format!("removal notice to {addr} failed: {}", response.status())));
        }
        Ok(())
    }

    /// Resets this node's own state after it has been told to leave the
    /// cluster (the target side of `send_force_reset`): drops its own
    /// truststore membership and stops the daemon so the embedding process
    /// can re-exec into a clean state.
    pub async fn reset_self(&self, removed_name: &str) -> Result<()> {
        let _ = self.truststore.remove(removed_name);
        self.shutdown().await?;
        let _ = std::fs::remove_dir_all(self.state_dir.root());
        Ok(())
    }

    async fn fan_out_post_remove(&self, target_name: &str) {
        let members = {
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
        for member in members.iter().filter(|m| m.role.is_attached()) {
            let url = format!("https://{}/cluster/internal/hooks", member.address);
            let body = serde_json::json!({"event": "post-remove", "member": target_name});
            let _ = client.post(&url).json(&body).send().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_derivation_is_stable() {
        assert_eq!(node_id_for("c1"), node_id_for("c1"));
        assert_ne!(node_id_for("c1"), node_id_for("c2"));
    }
}

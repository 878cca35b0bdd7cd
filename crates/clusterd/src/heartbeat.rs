//! The leader-only periodic heartbeat sweep (spec §4.5), grounded on the
//! teacher's `RaftClusterManager` for reading Raft's own membership view
//! and on `ormdb-gateway`'s request/response envelope for the wire shape
//! of the probe itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clusterd_core::{ClusterMember, DaemonError, MemberRole, Result};
use clusterd_db::DatabaseGateway;
use parking_lot::Mutex as PLMutex;
use serde::{Deserialize, Serialize};

use crate::daemon::node_id_for;
use crate::hooks::{Hooks, RoleStatus};
use crate::members::MemberStore;

/// Default heartbeat interval (spec §4.5).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// The body POSTed to each peer's internal `/heartbeat` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub begin_round: i64,
    pub leader_address: String,
    pub dqlite_roles: Vec<(String, MemberRole)>,
}

/// Drives the periodic sweep. Holds the heartbeat lock described in spec
/// §5's ordering guarantees, ensuring at most one concurrent round.
pub struct HeartbeatEngine {
    gateway: Arc<DatabaseGateway>,
    conn: Arc<PLMutex<rusqlite::Connection>>,
    store: Arc<MemberStore>,
    hooks: Arc<Hooks>,
    http: reqwest::Client,
    leader_address: String,
    interval: Duration,
    running: AtomicBool,
}

impl HeartbeatEngine {
    pub fn new(
        gateway: Arc<DatabaseGateway>,
        conn: Arc<PLMutex<rusqlite::Connection>>,
        store: Arc<MemberStore>,
        hooks: Arc<Hooks>,
        http: reqwest::Client,
        leader_address: String,
        interval: Duration,
    ) -> Self {
        Self {
            gateway,
            conn,
            store,
            hooks,
            http,
            leader_address,
            interval,
            running: AtomicBool::new(false),
        }
    }

    /// Spawns the timer loop; returns the task handle so the caller can
    /// abort it on shutdown.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_round().await {
                    tracing::warn!(error = %e, "heartbeat round failed");
                }
            }
        })
    }

    /// One sweep (spec §4.5 steps 1-5).
    pub async fn run_round(&self) -> Result<()> {
        // Step 1: heartbeat lock + readiness gate.
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.run_round_inner().await;
        self.running.store(false, Ordering::Release);
        result
    }

    async fn run_round_inner(&self) -> Result<()> {
        if self.gateway.is_open().is_err() {
            return Ok(());
        }
        // Step 2: leader-only.
        if !self.gateway.is_leader() {
            return Ok(());
        }

        let mut members = {
            let conn = self.conn.lock();
            self.store.list(&conn)?
        };

        self.promote_attached_learners(&mut members).await?;

        let begin_round = now_unix();
        let dqlite_roles: Vec<(String, MemberRole)> =
            members.iter().map(|m| (m.name.clone(), m.role)).collect();
        let request = HeartbeatRequest {
            begin_round,
            leader_address: self.leader_address.clone(),
            dqlite_roles,
        };

        // Step 3: parallel probes, with a timeout of twice the interval.
        let timeout = self.interval * 2;
        let attached: Vec<&ClusterMember> = members.iter().filter(|m| m.role.is_attached()).collect();
        let probes = attached.iter().map(|m| self.probe_one((*m).clone(), &request, timeout));
        let results = futures::future::join_all(probes).await;

        let mut updated: Vec<ClusterMember> = Vec::new();
        for (member, outcome) in attached.iter().zip(results) {
            match outcome {
                Ok(role) => {
                    // Step 4: transactional timestamp/role update.
                    let conn = self.conn.lock();
                    self.store.update_heartbeat(&conn, &member.name, begin_round, role)?;
                    let mut updated_member = member.clone();
                    updated_member.heartbeat = begin_round;
                    updated_member.role = role;
                    updated.push(updated_member);
                }
                Err(e) => {
                    // A failed heartbeat never marks a member offline;
                    // staleness is inferred from its stale timestamp.
                    tracing::warn!(member = %member.name, error = %e, "heartbeat probe failed");
                }
            }
        }

        // Step 5: user hook.
        self.hooks.run_on_heartbeat(RoleStatus { members: updated });
        Ok(())
    }

    /// Automatic leader-driven role assignment (spec overview, §4.4): a
    /// `pending` member that the join flow has already attached to Raft as
    /// a learner (see `Daemon::admit_join`'s `add_learner` call) is
    /// promoted to voter here, before this round's probes go out, so the
    /// heartbeat payload and the timestamp/role update both reflect the
    /// new role immediately.
    async fn promote_attached_learners(&self, members: &mut [ClusterMember]) -> Result<()> {
        let voter_ids: std::collections::HashSet<u64> =
            self.gateway.voter_addresses().into_iter().map(|(id, _)| id).collect();
        let learner_ids: std::collections::HashSet<u64> =
            self.gateway.learner_addresses().into_iter().map(|(id, _)| id).collect();

        let promotable: Vec<String> = members
            .iter()
            .filter(|m| m.role == MemberRole::Pending && learner_ids.contains(&node_id_for(&m.name)))
            .map(|m| m.name.clone())
            .collect();
        if promotable.is_empty() {
            return Ok(());
        }

        let new_voters: Vec<u64> = voter_ids
            .into_iter()
            .chain(promotable.iter().map(|name| node_id_for(name)))
            .collect();
        if let Err(e) = self.gateway.change_membership(new_voters).await {
            tracing::warn!(error = %e, "failed to promote newly attached members to voter");
            return Ok(());
        }

        let conn = self.conn.lock();
        for name in &promotable {
            self.store.update_role(&conn, name, MemberRole::Voter)?;
        }
        drop(conn);
        for member in members.iter_mut() {
            if promotable.contains(&member.name) {
                member.role = MemberRole::Voter;
            }
        }
        Ok(())
    }

    async fn probe_one(&self, member: ClusterMember, request: &HeartbeatRequest, timeout: Duration) -> Result<MemberRole> {
        let url = format!("https://{}/cluster/internal/heartbeat", member.address);
        let send = self.http.post(&url).json(request).send();
        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| DaemonError::Unavailable(format!("heartbeat to {} timed out", member.name)))?
            .map_err(|e| DaemonError::Unavailable(format!("heartbeat to {} failed: {e}", member.name)))?;

        if !response.status().is_success() {
            return Err(DaemonError::Unavailable(format!(
                "heartbeat to {} returned {}",
                member.name,
                response.status()
            )));
        }

        // `member.role` already reflects this round's promotion decision
        // (see `promote_attached_learners`, run before probes go out); a
        // successful heartbeat just confirms the member is reachable at
        // that role.
        Ok(member.role)
    }
}

pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_request_serializes_roles_as_pairs() {
        let req = HeartbeatRequest {
            begin_round: 1,
            leader_address: "10.0.0.1:9000".into(),
            dqlite_roles: vec![("c1".into(), MemberRole::Voter)],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("c1"));
        assert!(json.contains("voter"));
    }
}

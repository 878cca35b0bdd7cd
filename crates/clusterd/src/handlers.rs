//! `impl RequestHandlers for Daemon` (spec §4.8 step 6): dispatches every
//! non-hijacked endpoint across the Control, Public, and Internal resource
//! groups, grounded on the teacher's `ormdb-gateway` handler modules for
//! the one-match-arm-per-route shape.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use clusterd_core::{DaemonError, Result};
use clusterd_net::{ApiError, RequestContext, RequestHandlers};
use serde::Deserialize;

use crate::daemon::Daemon;
use crate::join::ClusterJoinRequest;

#[derive(Deserialize)]
struct IssueTokenBody {
    name: String,
    join_addresses: Vec<String>,
    #[serde(default)]
    expiry_date: Option<i64>,
}

#[derive(Deserialize)]
struct SqlBody {
    statements: Vec<String>,
}

#[derive(Deserialize)]
struct HooksBody {
    event: String,
    member: String,
}

async fn read_json<T: serde::de::DeserializeOwned>(req: Request<Body>) -> Result<T> {
    let bytes = axum::body::to_bytes(req.into_body(), 10 * 1024 * 1024)
        .await
        .map_err(|e| DaemonError::BadRequest(format!("failed to read request body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| DaemonError::BadRequest(format!("invalid request body: {e}")))
}

fn query_flag(req: &Request<Body>, key: &str) -> bool {
    req.uri()
        .query()
        .map(|q| q.split('&').any(|pair| pair == format!("{key}=1") || pair == format!("{key}=true")))
        .unwrap_or(false)
}

fn last_segment(relative_path: &str) -> &str {
    relative_path.rsplit('/').next().unwrap_or(relative_path)
}

#[async_trait]
impl RequestHandlers for Daemon {
    async fn handle(&self, ctx: RequestContext, req: Request<Body>) -> std::result::Result<Response, ApiError> {
        let method = req.method().clone();
        let path = ctx.relative_path.clone();

        let result = match (ctx.prefix, path.as_str()) {
            ("/core/control", "control") => self.handle_control_info().await,
            ("/core/control", "ready") | ("/cluster/1.0", "ready") => self.handle_ready(),
            ("/core/control", "shutdown") => self.handle_shutdown().await,
            ("/core/control", "cluster") if method == Method::GET => self.handle_list_members(),
            ("/core/control", "tokens") if method == Method::POST => self.handle_issue_token(req).await,
            ("/core/control", "tokens") if method == Method::GET => self.handle_list_tokens(),
            ("/core/control", "sql") if method == Method::POST => self.handle_sql(req).await,
            ("/core/control", "heartbeat") if method == Method::POST => self.handle_heartbeat_receive(req).await,
            ("/core/control", "hooks") if method == Method::POST => self.handle_hooks_receive(req).await,

            ("/cluster/1.0", "cluster") if method == Method::POST => self.handle_join_post(req).await,
            ("/cluster/1.0", "cluster") if method == Method::GET => self.handle_list_members(),
            ("/cluster/1.0", "tokens") if method == Method::POST => self.handle_issue_token(req).await,

            ("/cluster/internal", "heartbeat") if method == Method::POST => self.handle_heartbeat_receive(req).await,
            ("/cluster/internal", "hooks") if method == Method::POST => self.handle_hooks_receive(req).await,
            ("/cluster/internal", "sql") if method == Method::POST => self.handle_sql(req).await,

            _ if path.starts_with("cluster/certificates/") => {
                self.handle_rotate_certificate(last_segment(&path), req).await
            }
            _ if ctx.prefix == "/cluster/1.0" && path.starts_with("cluster/") => {
                let name = last_segment(&path).to_string();
                match method {
                    // A peer driving this member's removal (spec §4.6
                    // Remove): the replicated row is already gone, this
                    // node only needs to detach and reset locally.
                    Method::PUT if query_flag(&req, "force") => self.reset_self(&name).await.map(|_| crate::envelope::ok()),
                    Method::DELETE => {
                        let force = query_flag(&req, "force");
                        self.handle_remove(&name, force).await
                    }
                    _ => Err(DaemonError::NotFound(format!("no handler for {} {}", method, path))),
                }
            }

            _ => Err(DaemonError::NotFound(format!("no handler for {} {}", method, path))),
        };

        result.map_err(ApiError::from)
    }
}

impl Daemon {
    async fn handle_control_info(&self) -> Result<Response> {
        let gateway = self.gateway();
        let leader = gateway.as_ref().and_then(|g| g.leader_address());
        let members = {
            let conn = self.conn.lock();
            self.member_store.list(&conn)?
        };
        Ok(crate::envelope::sync(serde_json::json!({
            "name": self.name(),
            "leader_address": leader,
            "members": members.len(),
        })))
    }

    fn handle_ready(&self) -> Result<Response> {
        match self.gateway() {
            Some(gateway) => gateway
                .is_open()
                .map(|_| crate::envelope::ok())
                .map_err(|e| match e {
                    clusterd_db::IsOpenError::Waiting => {
                        DaemonError::Unavailable("database is waiting on peer upgrades".into())
                    }
                    clusterd_db::IsOpenError::Unavailable => DaemonError::Unavailable("database is not ready".into()),
                }),
            None => Err(DaemonError::Unavailable("database gateway not started".into())),
        }
    }

    async fn handle_shutdown(&self) -> Result<Response> {
        self.shutdown().await?;
        Ok(crate::envelope::ok())
    }

    fn handle_list_members(&self) -> Result<Response> {
        let conn = self.conn.lock();
        let members = self.member_store.list(&conn)?;
        Ok(crate::envelope::sync(members))
    }

    async fn handle_issue_token(&self, req: Request<Body>) -> Result<Response> {
        let body: IssueTokenBody = read_json(req).await?;
        let token = self.issue_token(&body.name, body.join_addresses, body.expiry_date)?;
        Ok(crate::envelope::sync(serde_json::json!({"token": token})))
    }

    fn handle_list_tokens(&self) -> Result<Response> {
        let conn = self.conn.lock();
        let tokens = self.member_store.list_tokens(&conn)?;
        Ok(crate::envelope::sync(tokens))
    }

    async fn handle_sql(&self, req: Request<Body>) -> Result<Response> {
        let gateway = self.gateway().ok_or_else(|| DaemonError::Unavailable("database gateway not started".into()))?;
        let body: SqlBody = read_json(req).await?;
        let outcome = gateway.transaction(|| body.statements.clone()).await?;
        Ok(crate::envelope::sync(outcome))
    }

    /// `/cluster/1.0/cluster` POST: either this node is the leader and
    /// admits the joiner directly, or it forwards the draft to the actual
    /// leader (spec §4.6 Join step 3's "forwarded to the leader if
    /// necessary").
    async fn handle_join_post(&self, req: Request<Body>) -> Result<Response> {
        let gateway = self.gateway();
        match &gateway {
            Some(g) if g.is_leader() => {
                let body: ClusterJoinRequest = read_json(req).await?;
                let response = self.admit_join(&body).await?;
                Ok(crate::envelope::sync(response))
            }
            Some(g) => {
                let leader_addr = g
                    .leader_address()
                    .ok_or_else(|| DaemonError::Unavailable("cluster has no known leader".into()))?;
                self.forward_join(&leader_addr, req).await
            }
            None => Err(DaemonError::Unavailable("database gateway not started".into())),
        }
    }

    async fn forward_join(&self, addr: &str, req: Request<Body>) -> Result<Response> {
        let client = clusterd_net::build_proxy_client(&self.identity, self.truststore.clone())?;
        let url = format!("https://{addr}/cluster/1.0/cluster");
        let bytes = axum::body::to_bytes(req.into_body(), 10 * 1024 * 1024)
            .await
            .map_err(|e| DaemonError::BadRequest(format!("failed to buffer join request: {e}")))?;
        let upstream = client
            .post(&url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| DaemonError::Unavailable(format!("failed to forward join to {addr}: {e}")))?;
        let status = upstream.status();
        let body = upstream
            .bytes()
            .await
            .map_err(|e| DaemonError::Unavailable(format!("failed to read forwarded join response: {e}")))?;
        Ok((status, body).into_response())
    }

    async fn handle_remove(&self, name: &str, force: bool) -> Result<Response> {
        self.remove_member(name, force).await?;
        Ok(crate::envelope::ok())
    }

    /// `PUT /cluster/internal/cluster/certificates/:name` (spec §5,
    /// scenario 6): writes the rotated pair locally, then — unless this
    /// call is itself a relayed copy — fans it out to every other attached
    /// member so the rotation takes effect cluster-wide.
    async fn handle_rotate_certificate(&self, name: &str, req: Request<Body>) -> Result<Response> {
        let relayed = query_flag(&req, "relayed");
        let pair: clusterd_core::KeyPair = read_json(req).await?;
        pair.write(&self.state_dir.additional_cert(name), &self.state_dir.additional_key(name))?;
        if !relayed {
            self.fan_out_certificate_rotation(name, &pair).await;
        }
        Ok(crate::envelope::ok())
    }

    async fn fan_out_certificate_rotation(&self, name: &str, pair: &clusterd_core::KeyPair) {
        let own_name = self.name();
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
        for member in members.iter().filter(|m| m.role.is_attached() && m.name != own_name) {
            let url = format!("https://{}/cluster/internal/cluster/certificates/{name}?relayed=1", member.address);
            let _ = client.put(&url).json(pair).send().await;
        }
    }

    /// The leader-only heartbeat probe a peer receives (spec §4.5 step 3):
    /// applies the leader's view of this node's own role, if it changed.
    async fn handle_heartbeat_receive(&self, req: Request<Body>) -> Result<Response> {
        let request: crate::heartbeat::HeartbeatRequest = read_json(req).await?;
        let own_name = self.name();
        if let Some((_, role)) = request.dqlite_roles.iter().find(|(name, _)| *name == own_name) {
            let conn = self.conn.lock();
            if let Some(member) = self.member_store.by_name(&conn, &own_name)? {
                if member.role != *role {
                    self.member_store.update_role(&conn, &own_name, *role)?;
                }
            }
        }
        Ok(crate::envelope::ok())
    }

    /// Fan-out receiver for `OnNewMember`/`PostRemove` propagation (spec
    /// §4.6 step 6 and the Remove sequence's final bullet).
    async fn handle_hooks_receive(&self, req: Request<Body>) -> Result<Response> {
        let body: HooksBody = read_json(req).await?;
        match body.event.as_str() {
            "post-remove" => self.hooks.run_post_remove(&body.member),
            "new-member" => {
                let member = {
                    let conn = self.conn.lock();
                    self.member_store.by_name(&conn, &body.member)?
                };
                if let Some(member) = member {
                    self.hooks.run_on_new_member(member);
                } else {
                    tracing::warn!(member = %body.member, "new-member hook fan-out named an unknown member");
                }
            }
            other => tracing::warn!(event = %other, "unknown hook fan-out event"),
        }
        Ok(crate::envelope::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_segment_splits_on_final_slash() {
        assert_eq!(last_segment("cluster/c3"), "c3");
        assert_eq!(last_segment("cluster/certificates/cluster"), "cluster");
    }
}

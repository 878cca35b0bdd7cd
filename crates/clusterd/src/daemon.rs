//! `Daemon` composition (SPEC_FULL.md crate-layout table): wires together
//! every leaf crate into the single object a consumer embeds, grounded on
//! `ormdb-server`'s `lib.rs` module inventory (one module per concern,
//! composed by a top-level type) and on `ormdb-raft::cluster::manager`'s
//! `RaftClusterManager` for the Raft lifecycle fields it needs to hold.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clusterd_core::{DaemonError, KeyPair, Result, StateDir};
use clusterd_db::{DatabaseGateway, GatewayConfig};
use clusterd_net::{EndpointRegistry, ListenerConfig, ListenerSet, ResourceGroup, RouterState};
use clusterd_schema::{Extensions, Migration, SchemaManager};
use clusterd_trust::Truststore;
use parking_lot::Mutex as PLMutex;

use crate::config::DaemonConfig;
use crate::heartbeat::{HeartbeatEngine, DEFAULT_INTERVAL};
use crate::hooks::Hooks;
use crate::members::{self, MemberStore};
use crate::token;

/// Derives this gateway's stable Raft node ID by hashing its member name
/// once (see `clusterd_db::types::NodeId`'s doc comment); `DefaultHasher`
/// is seeded deterministically when constructed directly (unlike
/// `HashMap`'s randomized `RandomState`), so the same name always yields
/// the same ID across restarts.
pub fn node_id_for(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Everything a consumer supplies at construction time.
pub struct DaemonOptions {
    pub state_dir: PathBuf,
    pub public_addr: SocketAddr,
    pub internal_addr: SocketAddr,
    pub external_migrations: Vec<Migration>,
    pub api_extensions: Vec<String>,
    pub extended_groups: Vec<ResourceGroup>,
    pub hooks: Hooks,
    pub gateway_config: GatewayConfig,
    pub heartbeat_interval: Duration,
}

impl DaemonOptions {
    pub fn new(state_dir: impl Into<PathBuf>, public_addr: SocketAddr, internal_addr: SocketAddr) -> Self {
        Self {
            state_dir: state_dir.into(),
            public_addr,
            internal_addr,
            external_migrations: Vec::new(),
            api_extensions: Vec::new(),
            extended_groups: Vec::new(),
            hooks: Hooks::default(),
            gateway_config: GatewayConfig::default(),
            heartbeat_interval: DEFAULT_INTERVAL,
        }
    }
}

/// One node's full state: filesystem layout, identity, truststore,
/// database gateway, request router wiring, and the running listener/
/// heartbeat tasks once started.
pub struct Daemon {
    pub(crate) state_dir: StateDir,
    pub(crate) identity: KeyPair,
    pub(crate) cluster_identity: PLMutex<Option<KeyPair>>,
    pub(crate) truststore: Arc<Truststore>,
    pub(crate) conn: Arc<PLMutex<rusqlite::Connection>>,
    pub(crate) member_store: Arc<MemberStore>,
    pub(crate) schema_extensions: Extensions,
    pub(crate) gateway: PLMutex<Option<Arc<DatabaseGateway>>>,
    pub(crate) hooks: Arc<Hooks>,
    pub(crate) registry: Arc<EndpointRegistry>,
    pub(crate) shutting_down: Arc<AtomicBool>,
    pub(crate) listeners: PLMutex<Option<ListenerSet>>,
    pub(crate) heartbeat_task: PLMutex<Option<tokio::task::JoinHandle<()>>>,
    pub(crate) config: PLMutex<DaemonConfig>,
    pub(crate) public_addr: SocketAddr,
    pub(crate) internal_addr: SocketAddr,
    pub(crate) gateway_config: GatewayConfig,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) self_removal_mutex: tokio::sync::Mutex<()>,
}

impl Daemon {
    /// Opens the state directory, loads or generates this node's server
    /// identity, loads the truststore, and opens (but does not yet start)
    /// the database connection. Does not bootstrap or join; call one of
    /// those next.
    pub fn open(name: &str, options: DaemonOptions) -> Result<Arc<Self>> {
        let state_dir = StateDir::open(&options.state_dir)?;

        // Adopt a pending recovery tarball before anything else starts
        // (spec §4.7, "On each other node, at startup").
        if clusterd_recovery::recovery_pending(&state_dir) {
            clusterd_recovery::reconcile(&state_dir, name)?;
        }

        let identity = state_dir.load_or_generate_server_identity(name)?;
        let cluster_identity = state_dir.load_cluster_identity()?;
        let truststore = Arc::new(Truststore::load(state_dir.truststore_dir())?);

        std::fs::create_dir_all(state_dir.database_dir())?;
        let conn = rusqlite::Connection::open(state_dir.database_file())
            .map_err(|e| DaemonError::Fatal(format!("failed to open database file: {e}")))?;

        let mut registry = EndpointRegistry::new();
        for group in options.extended_groups {
            registry.register_extended(group)?;
        }

        let config = DaemonConfig::load(&state_dir)?
            .unwrap_or_else(|| DaemonConfig::new(name, options.public_addr.to_string()));

        let daemon = Arc::new(Self {
            state_dir,
            identity,
            cluster_identity: PLMutex::new(cluster_identity),
            truststore,
            conn: Arc::new(PLMutex::new(conn)),
            member_store: Arc::new(MemberStore::new(name)),
            schema_extensions: Extensions::from_vec(options.api_extensions)?,
            gateway: PLMutex::new(None),
            hooks: Arc::new(options.hooks),
            registry: Arc::new(registry),
            shutting_down: Arc::new(AtomicBool::new(false)),
            listeners: PLMutex::new(None),
            heartbeat_task: PLMutex::new(None),
            config: PLMutex::new(config),
            public_addr: options.public_addr,
            internal_addr: options.internal_addr,
            gateway_config: options.gateway_config,
            heartbeat_interval: options.heartbeat_interval,
            self_removal_mutex: tokio::sync::Mutex::new(()),
        });
        let _ = options.external_migrations; // consumed by bootstrap/join's schema_manager()
        Ok(daemon)
    }

    pub fn name(&self) -> String {
        self.config.lock().name.clone()
    }

    pub fn state_dir(&self) -> &StateDir {
        &self.state_dir
    }

    pub fn truststore(&self) -> &Arc<Truststore> {
        &self.truststore
    }

    pub fn member_store(&self) -> &Arc<MemberStore> {
        &self.member_store
    }

    pub fn gateway(&self) -> Option<Arc<DatabaseGateway>> {
        self.gateway.lock().clone()
    }

    /// Assembles this node's migration list: the replicated member/token
    /// tables this crate owns, ahead of whatever a consumer registered.
    pub(crate) fn schema_manager(&self, external_migrations: Vec<Migration>) -> SchemaManager {
        SchemaManager::new(members::internal_migrations(), external_migrations, self.schema_extensions.clone())
    }

    pub(crate) fn capability_vector(&self, schema: &SchemaManager) -> clusterd_core::CapabilityVector {
        let (internal, external, extensions) = schema.version();
        clusterd_core::CapabilityVector::new(internal, external, extensions.to_vec())
    }

    pub(crate) fn node_id(&self) -> u64 {
        node_id_for(&self.name())
    }

    /// Starts the three built-in listeners plus any extended groups, and
    /// the leader heartbeat timer, once the database gateway is open.
    pub(crate) async fn start_network(self: &Arc<Self>) -> Result<()> {
        let gateway = self.gateway().ok_or_else(|| DaemonError::Fatal("database gateway not started".into()))?;

        let tls_server_config = clusterd_net::build_server_config(
            &self.identity,
            clusterd_net::TruststoreClientVerifier::spawn_watching(self.truststore.clone())?,
        )?;

        let proxy_client = clusterd_net::build_proxy_client(&self.identity, self.truststore.clone())?;

        let make_state = |transport| RouterState {
            registry: self.registry.clone(),
            truststore: self.truststore.clone(),
            gateway: gateway.clone(),
            handlers: self.clone() as Arc<dyn clusterd_net::RequestHandlers>,
            access_handler: None,
            shutting_down: self.shutting_down.clone(),
            transport,
            proxy_client: proxy_client.clone(),
        };

        let listener_config = ListenerConfig {
            control_socket_path: self.state_dir.control_socket(),
            public_addr: self.public_addr,
            internal_addr: self.internal_addr,
            tls_server_config,
        };

        let listeners = clusterd_net::start_listeners(
            listener_config,
            make_state(clusterd_net::Transport::Unix),
            make_state(clusterd_net::Transport::Https),
            make_state(clusterd_net::Transport::Https),
        )?;
        *self.listeners.lock() = Some(listeners);

        let engine = Arc::new(HeartbeatEngine::new(
            gateway,
            self.conn.clone(),
            self.member_store.clone(),
            self.hooks.clone(),
            proxy_client,
            self.public_addr.to_string(),
            self.heartbeat_interval,
        ));
        *self.heartbeat_task.lock() = Some(engine.spawn());

        Ok(())
    }

    /// Graceful shutdown: flips every listener's shutdown gate, gives
    /// in-flight `AllowedDuringShutdown` requests a moment to finish, then
    /// tears down the listeners, heartbeat timer, and database gateway.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutting_down.store(true, std::sync::atomic::Ordering::Release);
        if let Some(listeners) = self.listeners.lock().take() {
            listeners.begin_shutdown();
            tokio::time::sleep(Duration::from_millis(50)).await;
            listeners.stop().await;
        }
        if let Some(task) = self.heartbeat_task.lock().take() {
            task.abort();
        }
        if let Some(gateway) = self.gateway.lock().take() {
            gateway.stop().await?;
        }
        Ok(())
    }

    pub(crate) fn issue_token(&self, name: &str, join_addresses: Vec<String>, expiry_date: Option<i64>) -> Result<String> {
        let secret = clusterd_core::generate_secret();
        let cluster = self
            .cluster_identity
            .lock()
            .clone()
            .ok_or_else(|| DaemonError::Fatal("cluster identity not yet established".into()))?;
        let fingerprint = cluster.fingerprint()?;

        {
            let conn = self.conn.lock();
            self.member_store.create_token(
                &conn,
                &clusterd_core::TokenRecord { name: name.to_string(), secret: secret.clone(), expiry_date },
            )?;
        }

        token::JoinToken::new(name, secret, fingerprint, join_addresses).encode()
    }
}

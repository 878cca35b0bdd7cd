//! Listener lifecycle (spec §5): one accept loop per listener — the Unix
//! control socket, the public HTTPS listener, the internal HTTPS
//! listener, and any extended HTTPS listeners a consumer registers.
//! Grounded on the teacher binary's `axum::serve`/`TcpListener::bind`
//! startup shape in `ormdb-gateway`, adapted for a Unix socket and for
//! `axum_server::bind_rustls` with our truststore-rooted client-cert
//! acceptor.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use clusterd_core::{DaemonError, Result};
use tokio::net::UnixListener;

use crate::acceptor::ClientCertAcceptor;
use crate::router::{build_router, RouterState};

/// Holds every running listener task so the daemon can tear them all down
/// together on shutdown.
pub struct ListenerSet {
    tasks: Vec<tokio::task::JoinHandle<()>>,
    shutting_down: Arc<AtomicBool>,
}

impl ListenerSet {
    /// Flags every listener's router as shutting down (spec §4.8 step 1)
    /// without closing the sockets; callers that still expose
    /// `AllowedDuringShutdown` endpoints keep serving them until `stop`.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    /// Aborts every listener task. Called once in-flight shutdown
    /// endpoints have had a chance to respond.
    pub async fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Starts the Unix control-socket listener (spec §4.8's Control group).
/// The socket path is removed first if stale, matching the teacher
/// workspace's convention of owning its own runtime directory.
pub fn spawn_control_listener(socket_path: PathBuf, state: RouterState) -> Result<tokio::task::JoinHandle<()>> {
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)
        .map_err(|e| DaemonError::Fatal(format!("failed to bind control socket {}: {e}", socket_path.display())))?;

    let app = build_router(state);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "control socket listener exited");
        }
    }))
}

/// Starts one mutual-TLS HTTPS listener (used for the Public, Internal,
/// and any extended resource groups).
pub fn spawn_https_listener(
    addr: SocketAddr,
    tls_config: Arc<rustls::ServerConfig>,
    state: RouterState,
) -> tokio::task::JoinHandle<()> {
    let app = build_router(state);
    let acceptor = ClientCertAcceptor::new(axum_server::tls_rustls::RustlsAcceptor::new(
        RustlsConfig::from_config(tls_config),
    ));

    tokio::spawn(async move {
        let result = axum_server::bind(addr)
            .acceptor(acceptor)
            .serve(app.into_make_service())
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, %addr, "https listener exited");
        }
    })
}

/// Wires up the control socket plus the public and internal HTTPS
/// listeners (spec §4.8's three built-in resource groups) and returns a
/// handle that can flip them into graceful shutdown together.
pub struct ListenerConfig {
    pub control_socket_path: PathBuf,
    pub public_addr: SocketAddr,
    pub internal_addr: SocketAddr,
    pub tls_server_config: Arc<rustls::ServerConfig>,
}

pub fn start_listeners(
    cfg: ListenerConfig,
    control_state: RouterState,
    public_state: RouterState,
    internal_state: RouterState,
) -> Result<ListenerSet> {
    let shutting_down = control_state.shutting_down.clone();

    let control_task = spawn_control_listener(cfg.control_socket_path, control_state)?;
    let public_task = spawn_https_listener(cfg.public_addr, cfg.tls_server_config.clone(), public_state);
    let internal_task = spawn_https_listener(cfg.internal_addr, cfg.tls_server_config, internal_state);

    Ok(ListenerSet {
        tasks: vec![control_task, public_task, internal_task],
        shutting_down,
    })
}

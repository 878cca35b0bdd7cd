//! The request router (spec §4.8): the six-step per-request pipeline
//! shared by every listener, grounded structurally on the teacher's
//! `ormdb-gateway::create_router` (one `axum::Router` per transport,
//! `TraceLayer` for every request) with the auth/proxy/hijack steps the
//! teacher never needed added on top.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use clusterd_core::DaemonError;
use clusterd_db::DatabaseGateway;
use clusterd_trust::Truststore;
use tower_http::trace::TraceLayer;

use crate::acceptor::peer_certificate;
use crate::endpoints::{EndpointRegistry, Transport};
use crate::error::{ApiError, InvalidHostError};
use crate::proxy;

/// Everything a request handler needs to know about where it landed.
pub struct RequestContext {
    pub transport: Transport,
    pub prefix: &'static str,
    pub relative_path: String,
    pub peer_name: Option<String>,
    pub target: Option<String>,
}

/// Implemented by the root daemon crate to dispatch non-hijacked
/// endpoints; `clusterd-net` only knows how to get a request to the right
/// place, not what any endpoint other than `/database` actually does.
#[async_trait]
pub trait RequestHandlers: Send + Sync {
    async fn handle(&self, ctx: RequestContext, req: Request<Body>) -> Result<Response, ApiError>;
}

/// Short-circuits the pipeline at step 4 with a response of its own.
#[async_trait]
pub trait AccessHandler: Send + Sync {
    async fn check(&self, ctx: &RequestContext, req: &Request<Body>) -> Option<Response>;
}

/// Shared by every listener's `Router`; cloned cheaply per axum convention.
#[derive(Clone)]
pub struct RouterState {
    pub registry: Arc<EndpointRegistry>,
    pub truststore: Arc<Truststore>,
    pub gateway: Arc<DatabaseGateway>,
    pub handlers: Arc<dyn RequestHandlers>,
    pub access_handler: Option<Arc<dyn AccessHandler>>,
    pub shutting_down: Arc<AtomicBool>,
    pub transport: Transport,
    pub proxy_client: reqwest::Client,
}

/// Builds the axum `Router` for one transport (Unix control socket,
/// public HTTPS, or internal HTTPS); every path under that transport's
/// prefixes is funneled through [`dispatch`].
pub fn build_router(state: RouterState) -> Router {
    Router::new()
        .route("/*path", any(dispatch))
        .route("/", any(dispatch))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(State(state): State<RouterState>, req: Request<Body>) -> Response {
    match run_pipeline(state, req).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn run_pipeline(state: RouterState, req: Request<Body>) -> Result<Response, ApiError> {
    let path = req.uri().path().to_string();
    let (group, endpoint) = match resolve(&state.registry, state.transport, &path) {
        Some(found) => found,
        None => return Err(ApiError(DaemonError::NotFound(format!("no route for {path}")))),
    };

    // Step 1: shutdown gate.
    if state.shutting_down.load(Ordering::Acquire) && !endpoint.allowed_during_shutdown {
        return Err(ApiError(DaemonError::Unavailable("daemon is shutting down".into())));
    }

    // Step 2: pre-init gate.
    if !endpoint.allowed_before_init {
        if let Err(e) = state.gateway.is_open() {
            let message = match e {
                clusterd_db::IsOpenError::Waiting => "database is waiting on peer upgrades",
                clusterd_db::IsOpenError::Unavailable => "database is not ready",
            };
            return Err(ApiError(DaemonError::Unavailable(message.into())));
        }
    }

    // Step 3: authenticate.
    let peer_name = authenticate(&state, &req)?;

    let relative_path = path
        .strip_prefix(group.prefix)
        .unwrap_or(&path)
        .trim_start_matches('/')
        .to_string();

    let target = query_param(req.uri(), "target");

    let ctx = RequestContext {
        transport: state.transport,
        prefix: group.prefix,
        relative_path,
        peer_name,
        target: target.clone(),
    };

    // Step 4: access handler short-circuit.
    if let Some(handler) = &state.access_handler {
        if let Some(resp) = handler.check(&ctx, &req).await {
            return Ok(resp);
        }
    }

    // Step 5: proxy forwarding.
    if endpoint.proxy_target {
        if let Some(name) = &target {
            if Some(name.as_str()) != ctx.peer_name.as_deref() {
                let matches = state.truststore.remotes_by_name(std::slice::from_ref(name));
                if let Some(remote) = matches.into_iter().next() {
                    return proxy::forward(&state.proxy_client, &remote, req).await.map_err(ApiError);
                }
                return Err(ApiError(DaemonError::NotFound(format!("unknown member {name}"))));
            }
        }
    }

    // Step 6: dispatch, with the `/database` hijack as a special case.
    if endpoint.path == "database" {
        return hijack_for_database(state.gateway.clone(), req).await;
    }

    state.handlers.handle(ctx, req).await
}

fn authenticate(state: &RouterState, req: &Request<Body>) -> Result<Option<String>, ApiError> {
    match state.transport {
        Transport::Unix => Ok(None),
        Transport::Https => {
            // No client certificate at all is a not-yet-trusted joiner
            // hitting the public `/cluster` endpoint (spec §4.6 Join step
            // 2); the endpoint handler authorizes it via the join secret
            // instead of TLS identity.
            let Some(der) = peer_certificate(req) else {
                return Ok(None);
            };
            let fingerprint = fingerprint_der(&der);
            let remote = state
                .truststore
                .remote_by_certificate_fingerprint(&fingerprint)
                .ok_or_else(|| ApiError(DaemonError::Forbidden("certificate not in truststore".into())))?;

            if let Some(host) = req.headers().get(axum::http::header::HOST) {
                let host_str = host.to_str().unwrap_or_default();
                let expected_host = remote.address.split(':').next().unwrap_or_default();
                if !host_str.is_empty() && !host_str.starts_with(expected_host) {
                    return Err(InvalidHostError(host_str.to_string()).into());
                }
            }

            Ok(Some(remote.name))
        }
    }
}

fn fingerprint_der(der: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

fn resolve<'a>(registry: &'a EndpointRegistry, transport: Transport, path: &str) -> Option<(&'a crate::endpoints::ResourceGroup, &'a crate::endpoints::Endpoint)> {
    let groups: Vec<&crate::endpoints::ResourceGroup> = std::iter::once(match transport {
        Transport::Unix => &registry.control,
        Transport::Https => &registry.public,
    })
    .chain(if transport == Transport::Https { Some(&registry.internal) } else { None })
    .chain(registry.extended().iter())
    .collect();

    for group in groups {
        if group.transport != transport {
            continue;
        }
        let Some(rest) = path.strip_prefix(group.prefix) else { continue };
        let rest = rest.trim_start_matches('/');
        for endpoint in &group.endpoints {
            if path_matches(endpoint.path, rest) {
                return Some((group, endpoint));
            }
        }
    }
    None
}

/// Matches a registered endpoint path, which may contain a single `:name`
/// segment, against the request's path relative to its group prefix.
fn path_matches(pattern: &str, actual: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let actual_segments: Vec<&str> = actual.split('/').collect();
    if pattern_segments.len() != actual_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(actual_segments.iter())
        .all(|(p, a)| p.starts_with(':') || p == a)
}

fn query_param(uri: &Uri, key: &str) -> Option<String> {
    let query = uri.query()?;
    let params: HashMap<String, String> = query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let k = parts.next()?;
            let v = parts.next().unwrap_or_default();
            Some((k.to_string(), v.to_string()))
        })
        .collect();
    params.get(key).cloned()
}

/// Hijacks the underlying connection after a successful `Upgrade: dqlite`
/// handshake, handing it to the database gateway's accept loop (spec §4.8
/// step 6, the `/database` special case).
async fn hijack_for_database(gateway: Arc<DatabaseGateway>, req: Request<Body>) -> Result<Response, ApiError> {
    let version_ok = req
        .headers()
        .get(clusterd_db::network::VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(clusterd_db::network::version_is_compatible)
        .unwrap_or(false);

    let is_upgrade = req
        .headers()
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case(clusterd_db::network::UPGRADE_PROTOCOL))
        .unwrap_or(false);

    if !is_upgrade {
        return Err(ApiError(DaemonError::BadRequest("expected an Upgrade: dqlite request".into())));
    }
    if !version_ok {
        return Ok((StatusCode::UPGRADE_REQUIRED, "incompatible dqlite wire version").into_response());
    }

    let on_upgrade = hyper::upgrade::on(req);

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let io = hyper_util::rt::TokioIo::new(upgraded);
                if let Err(e) = gateway.accept(Box::new(io)) {
                    tracing::warn!(error = %e, "failed to hand hijacked connection to database gateway");
                }
            }
            Err(e) => tracing::warn!(error = %e, "database upgrade failed"),
        }
    });

    Ok((StatusCode::SWITCHING_PROTOCOLS, ()).into_response())
}

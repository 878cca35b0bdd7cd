//! clusterd-net - the endpoint registry, mutual-TLS fabric, and request
//! router (spec §4.8), grounded on the teacher's `ormdb-gateway` for the
//! axum/tower shape and on the load-test pack's `axum_server::bind_rustls`
//! usage for the TLS listener plumbing.

pub mod acceptor;
pub mod endpoints;
pub mod error;
pub mod proxy;
pub mod router;
pub mod server;
pub mod tls;

pub use endpoints::{Endpoint, EndpointRegistry, ResourceGroup, Transport};
pub use error::{ApiError, InvalidHostError};
pub use router::{AccessHandler, RequestContext, RequestHandlers, RouterState};
pub use server::{start_listeners, ListenerConfig, ListenerSet};
pub use tls::{build_client_config, build_pinned_client, build_proxy_client, build_server_config, fetch_peer_certificate, TruststoreClientVerifier};

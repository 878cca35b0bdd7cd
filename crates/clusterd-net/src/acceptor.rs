//! A `RustlsAcceptor` wrapper that threads the client's verified peer
//! certificate into request extensions, so the router (spec §4.8 step 3)
//! can authenticate without reaching into hyper/rustls internals itself.

use std::future::Future;
use std::pin::Pin;

use axum::extract::Request;
use axum_server::accept::Accept;
use axum_server::tls_rustls::RustlsAcceptor;
use tokio::io::{AsyncRead, AsyncWrite};
use tower::Layer;
use tower_http::add_extension::{AddExtension, AddExtensionLayer};

/// The DER-encoded leaf certificate the client presented during the
/// mutual-TLS handshake, if any. Absent only when the listener is
/// misconfigured to not require client auth.
#[derive(Debug, Clone)]
pub struct PeerCertificate(pub Vec<u8>);

#[derive(Clone)]
pub struct ClientCertAcceptor {
    inner: RustlsAcceptor,
}

impl ClientCertAcceptor {
    pub fn new(inner: RustlsAcceptor) -> Self {
        Self { inner }
    }
}

impl<I, S> Accept<I, S> for ClientCertAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = tokio_rustls::server::TlsStream<I>;
    type Service = AddExtension<S, PeerCertificate>;
    type Future = Pin<Box<dyn Future<Output = std::io::Result<(Self::Stream, Self::Service)>> + Send>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let acceptor = self.inner.clone();
        Box::pin(async move {
            let (stream, service) = acceptor.accept(stream, service).await?;
            let (_, conn) = stream.get_ref();
            let peer_der = conn
                .peer_certificates()
                .and_then(|certs| certs.first())
                .map(|c| c.to_vec())
                .unwrap_or_default();

            let service = AddExtensionLayer::new(PeerCertificate(peer_der)).layer(service);
            Ok((stream, service))
        })
    }
}

pub fn peer_certificate(req: &Request) -> Option<Vec<u8>> {
    req.extensions()
        .get::<PeerCertificate>()
        .map(|c| c.0.clone())
        .filter(|der| !der.is_empty())
}

//! Mutual-TLS fabric rooted in the truststore, grounded structurally on
//! the teacher pack's TLS config builders (`hiqlite`'s `ServerTlsConfig`)
//! but built from `clusterd_trust::Truststore` certificates instead of a
//! static CA file, since spec §4.1 has no single CA: every peer trusts the
//! exact set of certificates in its truststore, and that set changes at
//! runtime as members join and leave.

use std::fmt::Debug;
use std::sync::Arc;

use clusterd_core::{identity::KeyPair, DaemonError, Result};
use clusterd_trust::Truststore;
use parking_lot::RwLock;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};

fn own_cert_chain_and_key(identity: &KeyPair) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let mut cert_reader = identity.cert_pem.as_bytes();
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DaemonError::Fatal(format!("invalid server certificate PEM: {e}")))?;

    let mut key_reader = identity.key_pem.as_bytes();
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| DaemonError::Fatal(format!("invalid server key PEM: {e}")))?
        .ok_or_else(|| DaemonError::Fatal("no private key found in identity PEM".into()))?;

    Ok((certs, key))
}

fn truststore_root_store(truststore: &Truststore) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for der in truststore.certificates_native()? {
        roots
            .add(CertificateDer::from(der))
            .map_err(|e| DaemonError::Fatal(format!("invalid truststore certificate: {e}")))?;
    }
    Ok(roots)
}

/// A `ClientCertVerifier` that delegates to a freshly built
/// `WebPkiClientVerifier` every time the truststore's version channel
/// ticks, so accepted peer certificates track membership changes without
/// tearing down the listener.
pub struct TruststoreClientVerifier {
    inner: RwLock<Arc<dyn ClientCertVerifier>>,
}

impl Debug for TruststoreClientVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TruststoreClientVerifier").finish()
    }
}

impl TruststoreClientVerifier {
    pub fn spawn_watching(truststore: Arc<Truststore>) -> Result<Arc<Self>> {
        let initial = Self::build_inner(&truststore)?;
        let verifier = Arc::new(Self {
            inner: RwLock::new(initial),
        });

        let watched = verifier.clone();
        let mut versions = truststore.subscribe();
        tokio::spawn(async move {
            loop {
                if versions.changed().await.is_err() {
                    return;
                }
                match Self::build_inner(&truststore) {
                    Ok(rebuilt) => *watched.inner.write() = rebuilt,
                    Err(e) => tracing::warn!(error = %e, "failed to rebuild client verifier after truststore reload"),
                }
            }
        });

        Ok(verifier)
    }

    fn build_inner(truststore: &Truststore) -> Result<Arc<dyn ClientCertVerifier>> {
        let roots = truststore_root_store(truststore)?;
        // `allow_unauthenticated` lets a not-yet-trusted joiner reach the
        // public `/cluster` join endpoint without presenting a client
        // certificate at all (spec §4.6 Join step 2); the router's own
        // `authenticate` then treats such a connection as anonymous and
        // leaves authorization to the endpoint handler (the join secret).
        WebPkiClientVerifier::builder(Arc::new(roots))
            .allow_unauthenticated()
            .build()
            .map_err(|e| DaemonError::Fatal(format!("failed to build client verifier: {e}")))
    }

    fn current(&self) -> Arc<dyn ClientCertVerifier> {
        self.inner.read().clone()
    }
}

impl ClientCertVerifier for TruststoreClientVerifier {
    fn offer_client_auth(&self) -> bool {
        self.current().offer_client_auth()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.current().client_auth_mandatory()
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        // Borrowing through a freshly-read Arc can't outlive this call, so
        // callers that need live subjects should rely on verification
        // rather than hinting; an empty hint is always a valid answer.
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        self.current().verify_client_cert(end_entity, intermediates, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.current().verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.current().verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.current().supported_verify_schemes()
    }
}

/// Builds the mutual-TLS `rustls::ServerConfig` used by the control and
/// internal/public HTTPS listeners.
pub fn build_server_config(identity: &KeyPair, verifier: Arc<TruststoreClientVerifier>) -> Result<Arc<rustls::ServerConfig>> {
    let (certs, key) = own_cert_chain_and_key(identity)?;
    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| DaemonError::Fatal(format!("invalid server TLS config: {e}")))?;
    Ok(Arc::new(config))
}

/// A `ServerCertVerifier` that accepts exactly the certificates currently
/// in the truststore, used by the dial path's `rustls::ClientConfig`
/// (spec §4.4): there is no public CA, so ordinary webpki chain
/// validation against system roots would reject every peer.
#[derive(Debug)]
pub struct TruststoreServerVerifier {
    truststore: Arc<Truststore>,
}

impl TruststoreServerVerifier {
    pub fn new(truststore: Arc<Truststore>) -> Arc<Self> {
        Arc::new(Self { truststore })
    }
}

impl ServerCertVerifier for TruststoreServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let known = self
            .truststore
            .certificates_native()
            .map_err(|e| rustls::Error::General(e.to_string()))?;
        if known.iter().any(|der| der.as_slice() == end_entity.as_ref()) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "peer certificate is not present in the truststore".into(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Builds the `rustls::ClientConfig` used when this node dials a peer's
/// internal `/database` endpoint (spec §4.4's dial path).
pub fn build_client_config(identity: &KeyPair, truststore: Arc<Truststore>) -> Result<Arc<rustls::ClientConfig>> {
    let (certs, key) = own_cert_chain_and_key(identity)?;
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(TruststoreServerVerifier::new(truststore))
        .with_client_auth_cert(certs, key)
        .map_err(|e| DaemonError::Fatal(format!("invalid client TLS config: {e}")))?;
    Ok(Arc::new(config))
}

/// Builds the `reqwest::Client` the router uses to forward `ProxyTarget`
/// requests (spec §4.8 step 5) over the same mutual-TLS fabric as every
/// other inter-node call, instead of trusting the system root store.
pub fn build_proxy_client(identity: &KeyPair, truststore: Arc<Truststore>) -> Result<reqwest::Client> {
    let config = build_client_config(identity, truststore)?;
    reqwest::Client::builder()
        .use_preconfigured_tls((*config).clone())
        .build()
        .map_err(|e| DaemonError::Fatal(format!("failed to build proxy client: {e}")))
}

/// Accepts any server certificate without verification; used only to dial
/// an unjoined peer long enough to read its advertised certificate (spec
/// §4.6 Join step 1 — the joiner has nothing in its truststore yet).
#[derive(Debug)]
struct AcceptAnyServerVerifier;

impl ServerCertVerifier for AcceptAnyServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &rustls::crypto::ring::default_provider().signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &rustls::crypto::ring::default_provider().signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

fn pem_encode_cert(der: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    let encoded = BASE64.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Verifies the server presents exactly one pinned certificate, trusting
/// no CA at all. Used for the one join-address POST the joiner makes
/// before it has anything durable in its own truststore (spec §4.6 Join
/// step 2): by that point the caller has already confirmed the peer's
/// fingerprint matches the join token, so pinning that single DER is
/// sufficient without standing up a full `Truststore`.
#[derive(Debug)]
struct PinnedServerVerifier(Vec<u8>);

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.0.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General("server certificate does not match the pinned fingerprint".into()))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &rustls::crypto::ring::default_provider().signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &rustls::crypto::ring::default_provider().signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

fn pem_to_der_one(cert_pem: &str) -> Result<Vec<u8>> {
    let mut reader = std::io::Cursor::new(cert_pem.as_bytes());
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DaemonError::BadRequest(format!("invalid certificate PEM: {e}")))?;
    certs
        .into_iter()
        .next()
        .map(|c| c.to_vec())
        .ok_or_else(|| DaemonError::BadRequest("certificate PEM contained no entries".into()))
}

/// Builds a `reqwest::Client` that trusts exactly `peer_cert_pem` and
/// presents no client certificate of its own, for the anonymous join POST.
pub fn build_pinned_client(peer_cert_pem: &str) -> Result<reqwest::Client> {
    let der = pem_to_der_one(peer_cert_pem)?;
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PinnedServerVerifier(der)))
        .with_no_client_auth();
    reqwest::Client::builder()
        .use_preconfigured_tls(config)
        .build()
        .map_err(|e| DaemonError::Fatal(format!("failed to build pinned join client: {e}")))
}

/// Dials `addr` with client-auth enabled but server verification disabled,
/// and returns the PEM-encoded leaf certificate the peer presented. The
/// caller (spec §4.6 Join step 1) is responsible for checking the result's
/// fingerprint against the join token before trusting it for anything else.
pub async fn fetch_peer_certificate(addr: &str, identity: &KeyPair) -> Result<String> {
    let (certs, key) = own_cert_chain_and_key(identity)?;
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerVerifier))
        .with_client_auth_cert(certs, key)
        .map_err(|e| DaemonError::Fatal(format!("invalid probe TLS config: {e}")))?;

    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let stream = tokio::net::TcpStream::connect(addr)
        .await
        .map_err(|e| DaemonError::Unavailable(format!("failed to dial {addr}: {e}")))?;

    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| DaemonError::Fatal(format!("invalid server name {host}: {e}")))?;

    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| DaemonError::Unavailable(format!("TLS handshake with {addr} failed: {e}")))?;

    let (_, conn) = tls_stream.get_ref();
    let der = conn
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| DaemonError::Unavailable(format!("{addr} presented no certificate")))?;

    Ok(pem_encode_cert(der))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterd_trust::Remote;
    use tempfile::tempdir;

    #[tokio::test]
    async fn server_config_builds_with_watching_verifier() {
        let identity = KeyPair::generate("node-a").unwrap();
        let peer = KeyPair::generate("node-b").unwrap();

        let dir = tempdir().unwrap();
        let truststore = Arc::new(Truststore::load(dir.path().to_path_buf()).unwrap());
        truststore
            .add(vec![Remote::new("node-b", "10.0.0.2:9000", peer.cert_pem.clone())])
            .unwrap();

        let verifier = TruststoreClientVerifier::spawn_watching(truststore).unwrap();
        let config = build_server_config(&identity, verifier);
        assert!(config.is_ok());
    }
}

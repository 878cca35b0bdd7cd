//! Node and cluster identity: self-signed certificate/key pairs and
//! fingerprinting.
//!
//! A daemon owns two identities: its own `server.{crt,key}` (stable across
//! the node's lifetime) and the cluster-wide `cluster.{crt,key}` shared by
//! every member for inter-node mutual TLS. Both are represented the same
//! way: a PEM certificate plus a PEM private key, generated with `rcgen`
//! when absent and otherwise loaded verbatim from disk.

use std::path::Path;

use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, SanType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DaemonError, Result};

/// A PEM certificate and private key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

impl KeyPair {
    /// Generate a new self-signed identity.
    ///
    /// `name` becomes both the certificate's common name and a DNS
    /// Subject Alternative Name, so join-token validation (spec §3:
    /// "joining node's certificate SAN must contain the token's intended
    /// member name") can match on it directly.
    pub fn generate(name: &str) -> Result<Self> {
        let mut params = CertificateParams::new(vec![name.to_string()]);
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, name);
        params.distinguished_name = dn;
        params
            .subject_alt_names
            .push(SanType::DnsName(name.to_string()));

        let cert = Certificate::from_params(params)
            .map_err(|e| DaemonError::Fatal(format!("certificate generation failed: {e}")))?;

        let cert_pem = cert
            .serialize_pem()
            .map_err(|e| DaemonError::Fatal(format!("certificate encoding failed: {e}")))?;
        let key_pem = cert.serialize_private_key_pem();

        Ok(Self { cert_pem, key_pem })
    }

    /// Load an identity from a cert/key file pair, generating and
    /// persisting a new one if either file is missing.
    pub fn load_or_generate(cert_path: &Path, key_path: &Path, name: &str) -> Result<Self> {
        if cert_path.exists() && key_path.exists() {
            let cert_pem = std::fs::read_to_string(cert_path)?;
            let key_pem = std::fs::read_to_string(key_path)?;
            if cert_pem.trim().is_empty() || key_pem.trim().is_empty() {
                return Err(DaemonError::Fatal(format!(
                    "identity at {} is empty",
                    cert_path.display()
                )));
            }
            return Ok(Self { cert_pem, key_pem });
        }

        let pair = Self::generate(name)?;
        pair.write(cert_path, key_path)?;
        Ok(pair)
    }

    /// Atomically persist this pair to disk (rename-over-temp, matching
    /// the truststore's write discipline).
    pub fn write(&self, cert_path: &Path, key_path: &Path) -> Result<()> {
        write_atomic(cert_path, self.cert_pem.as_bytes())?;
        write_atomic(key_path, self.key_pem.as_bytes())?;
        Ok(())
    }

    /// SHA-256 fingerprint of the DER-encoded certificate, hex-encoded.
    ///
    /// This is the value stored and compared throughout the truststore and
    /// join-token protocol.
    pub fn fingerprint(&self) -> Result<String> {
        fingerprint_pem(&self.cert_pem)
    }
}

/// Whether `cert_pem`'s Subject Alternative Names include `name` exactly
/// (spec §4.6 Join step 3: "the joining node's certificate SAN must
/// contain the token's intended member name").
pub fn certificate_has_san(cert_pem: &str, name: &str) -> Result<bool> {
    let der = pem_to_der(cert_pem)?;
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(&der)
        .map_err(|e| DaemonError::BadRequest(format!("invalid certificate DER: {e}")))?;
    let Ok(Some(san)) = cert.subject_alternative_name() else {
        return Ok(false);
    };
    Ok(san.value.general_names.iter().any(|gn| match gn {
        x509_parser::extensions::GeneralName::DNSName(dns) => *dns == name,
        _ => false,
    }))
}

/// Compute the SHA-256 fingerprint of a PEM certificate.
pub fn fingerprint_pem(cert_pem: &str) -> Result<String> {
    let der = pem_to_der(cert_pem)?;
    let mut hasher = Sha256::new();
    hasher.update(&der);
    Ok(hex::encode(hasher.finalize()))
}

fn pem_to_der(cert_pem: &str) -> Result<Vec<u8>> {
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

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_fingerprint_are_stable() {
        let pair = KeyPair::generate("node-a").unwrap();
        let fp1 = pair.fingerprint().unwrap();
        let fp2 = pair.fingerprint().unwrap();
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 64);
    }

    #[test]
    fn load_or_generate_persists_and_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");

        let first = KeyPair::load_or_generate(&cert_path, &key_path, "node-a").unwrap();
        let second = KeyPair::load_or_generate(&cert_path, &key_path, "node-a").unwrap();

        assert_eq!(first.cert_pem, second.cert_pem);
        assert_eq!(first.key_pem, second.key_pem);
    }
}

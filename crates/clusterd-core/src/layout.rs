//! Resolves the configured state directory into the well-known subpaths
//! every other crate reads and writes.
//!
//! See spec §6 "State directory layout" for the authoritative list. This
//! module owns only path resolution and the server/cluster key-pair
//! bootstrap; the truststore, database, and control socket are owned by
//! their respective crates.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::identity::KeyPair;

/// Resolved paths under a daemon's state directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Wrap a root directory, creating it if necessary.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The state directory root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `daemon.yaml` — local daemon configuration.
    pub fn daemon_config(&self) -> PathBuf {
        self.root.join("daemon.yaml")
    }

    /// `server.crt` — this node's identity certificate.
    pub fn server_cert(&self) -> PathBuf {
        self.root.join("server.crt")
    }

    /// `server.key` — this node's identity private key.
    pub fn server_key(&self) -> PathBuf {
        self.root.join("server.key")
    }

    /// `cluster.crt` — shared inter-node identity certificate.
    pub fn cluster_cert(&self) -> PathBuf {
        self.root.join("cluster.crt")
    }

    /// `cluster.key` — shared inter-node identity private key.
    pub fn cluster_key(&self) -> PathBuf {
        self.root.join("cluster.key")
    }

    /// `certificates/` — additional per-listener certificate pairs.
    pub fn certificates_dir(&self) -> PathBuf {
        self.root.join("certificates")
    }

    /// `certificates/<name>.crt` — an additional listener's certificate.
    pub fn additional_cert(&self, name: &str) -> PathBuf {
        self.certificates_dir().join(format!("{name}.crt"))
    }

    /// `certificates/<name>.key` — an additional listener's private key.
    pub fn additional_key(&self, name: &str) -> PathBuf {
        self.certificates_dir().join(format!("{name}.key"))
    }

    /// `truststore/` — one YAML file per known peer.
    pub fn truststore_dir(&self) -> PathBuf {
        self.root.join("truststore")
    }

    /// `database/` — the embedded Raft-SQL engine's private directory.
    pub fn database_dir(&self) -> PathBuf {
        self.root.join("database")
    }

    /// `database/info.yaml` — this node's Raft identity (never tarballed).
    pub fn node_info(&self) -> PathBuf {
        self.database_dir().join("info.yaml")
    }

    /// `database/cluster.yaml` — Raft's view of cluster membership.
    pub fn raft_cluster_state(&self) -> PathBuf {
        self.database_dir().join("cluster.yaml")
    }

    /// `database/db.bin` — the replicated SQL store file.
    pub fn database_file(&self) -> PathBuf {
        self.database_dir().join("db.bin")
    }

    /// `control.socket` — Unix socket for local control requests.
    pub fn control_socket(&self) -> PathBuf {
        self.root.join("control.socket")
    }

    /// `recovery_db.tar.gz` — present only while a recovery is pending.
    pub fn recovery_tarball(&self) -> PathBuf {
        self.root.join("recovery_db.tar.gz")
    }

    /// `patch.global.sql` — statements applied once on next successful
    /// open.
    pub fn patch_global_sql(&self) -> PathBuf {
        self.root.join("patch.global.sql")
    }

    /// A timestamped `db_backup.<ISO8601-basic>.tar.gz` path.
    pub fn db_backup(&self, timestamp: &str) -> PathBuf {
        self.root.join(format!("db_backup.{timestamp}.tar.gz"))
    }

    /// Load this node's server identity, generating one on first start.
    pub fn load_or_generate_server_identity(&self, name: &str) -> Result<KeyPair> {
        KeyPair::load_or_generate(&self.server_cert(), &self.server_key(), name)
    }

    /// Load the cluster identity. Unlike the server identity this is never
    /// silently generated outside of `Bootstrap`, since every member must
    /// share the exact same pair.
    pub fn load_cluster_identity(&self) -> Result<Option<KeyPair>> {
        let cert_path = self.cluster_cert();
        let key_path = self.cluster_key();
        if !cert_path.exists() || !key_path.exists() {
            return Ok(None);
        }
        Ok(Some(KeyPair::load_or_generate(
            &cert_path, &key_path, "cluster",
        )?))
    }

    /// Whether the control socket's absence indicates the daemon process is
    /// not currently running (used by recovery's precondition check).
    pub fn is_daemon_stopped(&self) -> bool {
        !self.control_socket().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_all_well_known_subpaths() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateDir::open(dir.path()).unwrap();

        assert_eq!(layout.daemon_config(), dir.path().join("daemon.yaml"));
        assert_eq!(layout.database_file(), dir.path().join("database/db.bin"));
        assert_eq!(
            layout.node_info(),
            dir.path().join("database/info.yaml")
        );
        assert!(layout.is_daemon_stopped());
    }

    #[test]
    fn server_identity_is_generated_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateDir::open(dir.path()).unwrap();

        let first = layout.load_or_generate_server_identity("node-a").unwrap();
        let second = layout.load_or_generate_server_identity("node-a").unwrap();
        assert_eq!(first.cert_pem, second.cert_pem);
    }
}

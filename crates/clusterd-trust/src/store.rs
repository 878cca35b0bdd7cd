//! The truststore itself: a single reader-writer lock guarding an
//! in-memory `name -> Remote` map backed by one YAML file per peer under
//! the truststore directory (spec §4.1).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clusterd_core::identity::fingerprint_pem;
use clusterd_core::{DaemonError, Result};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::remote::Remote;

/// On-disk peer truststore, watched for off-process edits.
pub struct Truststore {
    dir: PathBuf,
    inner: RwLock<HashMap<String, Remote>>,
    /// Bumped on every successful mutation; lets the TLS acceptor and other
    /// consumers `watch::Receiver::changed()` instead of polling.
    version: watch::Sender<u64>,
}

impl Truststore {
    /// Load every `*.yaml` file under `dir`. Non-YAML entries are ignored;
    /// a file with an empty certificate is a hard failure (spec §4.1).
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let remotes = read_all(&dir)?;

        let mut by_name = HashMap::new();
        for r in remotes {
            by_name.insert(r.name.clone(), r);
        }

        let (version, _) = watch::channel(0);
        Ok(Self {
            dir,
            inner: RwLock::new(by_name),
            version,
        })
    }

    /// Subscribe to truststore change notifications.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Reload from disk, replacing the in-memory map wholesale. Rejects a
    /// reload that would yield zero remotes, to protect against observing
    /// a directory mid-edit (spec §4.1 Failure policy).
    pub fn reload(&self) -> Result<()> {
        let remotes = read_all(&self.dir)?;
        if remotes.is_empty() {
            return Err(DaemonError::BadRequest(
                "truststore reload yielded zero remotes; ignoring".into(),
            ));
        }
        let mut by_name = HashMap::new();
        for r in remotes {
            by_name.insert(r.name.clone(), r);
        }
        *self.inner.write() = by_name;
        self.version.send_modify(|v| *v += 1);
        Ok(())
    }

    /// Add one or more remotes. Fails entirely (no partial writes) if any
    /// name already exists or any certificate is empty.
    pub fn add(&self, remotes: impl IntoIterator<Item = Remote>) -> Result<()> {
        let remotes: Vec<Remote> = remotes.into_iter().collect();
        let guard = self.inner.read();
        for r in &remotes {
            if r.certificate.trim().is_empty() {
                return Err(DaemonError::BadRequest(format!(
                    "remote {} has an empty certificate",
                    r.name
                )));
            }
            if guard.contains_key(&r.name) {
                return Err(DaemonError::Conflict(format!(
                    "remote {} already present in truststore",
                    r.name
                )));
            }
        }
        drop(guard);

        for r in &remotes {
            write_remote(&self.dir, r)?;
        }

        let mut guard = self.inner.write();
        for r in remotes {
            guard.insert(r.name.clone(), r);
        }
        drop(guard);
        self.version.send_modify(|v| *v += 1);
        Ok(())
    }

    /// Atomically install a new full set of remotes, deleting any file no
    /// longer present. Fails on empty input.
    pub fn replace(&self, remotes: impl IntoIterator<Item = Remote>) -> Result<()> {
        let remotes: Vec<Remote> = remotes.into_iter().collect();
        if remotes.is_empty() {
            return Err(DaemonError::BadRequest(
                "refusing to replace truststore with an empty set".into(),
            ));
        }

        let keep: std::collections::HashSet<String> =
            remotes.iter().map(|r| r.file_name()).collect();
        for entry in std::fs::read_dir(&self.dir)?.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.ends_with(".yaml") && !keep.contains(&file_name) {
                let _ = std::fs::remove_file(entry.path());
            }
        }
        for r in &remotes {
            write_remote(&self.dir, r)?;
        }

        let mut by_name = HashMap::new();
        for r in remotes {
            by_name.insert(r.name.clone(), r);
        }
        *self.inner.write() = by_name;
        self.version.send_modify(|v| *v += 1);
        Ok(())
    }

    /// Remove a single remote by name (used by member removal).
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.dir.join(format!("{name}.yaml"));
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        self.inner.write().remove(name);
        self.version.send_modify(|v| *v += 1);
        Ok(())
    }

    pub fn remote_by_address(&self, address: &str) -> Option<Remote> {
        self.inner
            .read()
            .values()
            .find(|r| r.address == address)
            .cloned()
    }

    pub fn remote_by_certificate_fingerprint(&self, fingerprint: &str) -> Option<Remote> {
        self.inner
            .read()
            .values()
            .find(|r| fingerprint_pem(&r.certificate).ok().as_deref() == Some(fingerprint))
            .cloned()
    }

    pub fn remotes_by_name(&self, names: &[String]) -> Vec<Remote> {
        let guard = self.inner.read();
        names.iter().filter_map(|n| guard.get(n).cloned()).collect()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.inner.read().values().map(|r| r.address.clone()).collect()
    }

    /// DER-encoded certificates of every known peer, suitable for seeding a
    /// rustls client-certificate verifier's trust anchor set.
    pub fn certificates_native(&self) -> Result<Vec<Vec<u8>>> {
        self.inner
            .read()
            .values()
            .map(|r| der_of(&r.certificate))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

fn der_of(cert_pem: &str) -> Result<Vec<u8>> {
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

fn read_all(dir: &Path) -> Result<Vec<Remote>> {
    let mut remotes = Vec::new();
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        let remote: Remote = match serde_yaml::from_str(&contents) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if remote.certificate.trim().is_empty() {
            return Err(DaemonError::Fatal(format!(
                "truststore entry {} has an empty certificate",
                path.display()
            )));
        }
        remotes.push(remote);
    }
    Ok(remotes)
}

fn write_remote(dir: &Path, remote: &Remote) -> Result<()> {
    let path = dir.join(remote.file_name());
    let tmp = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(remote)?;
    std::fs::write(&tmp, yaml)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pem_fixture() -> String {
        "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n".to_string()
    }

    #[test]
    fn add_rejects_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = Truststore::load(dir.path()).unwrap();
        store.add([Remote::new("c1", "10.0.0.1:9000", pem_fixture())]).unwrap();

        let err = store
            .add([Remote::new("c1", "10.0.0.2:9000", pem_fixture())])
            .unwrap_err();
        assert!(matches!(err, DaemonError::Conflict(_)));
    }

    #[test]
    fn add_rejects_empty_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let store = Truststore::load(dir.path()).unwrap();
        let err = store.add([Remote::new("c1", "10.0.0.1:9000", "")]).unwrap_err();
        assert!(matches!(err, DaemonError::BadRequest(_)));
    }

    #[test]
    fn replace_deletes_stale_files_and_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Truststore::load(dir.path()).unwrap();
        store
            .add([
                Remote::new("c1", "10.0.0.1:9000", pem_fixture()),
                Remote::new("c2", "10.0.0.2:9000", pem_fixture()),
            ])
            .unwrap();

        store.replace([Remote::new("c2", "10.0.0.2:9001", pem_fixture())]).unwrap();
        assert!(store.remote_by_address("10.0.0.1:9000").is_none());
        assert!(store.remote_by_address("10.0.0.2:9001").is_some());
        assert!(!dir.path().join("c1.yaml").exists());

        let err = store.replace(Vec::<Remote>::new()).unwrap_err();
        assert!(matches!(err, DaemonError::BadRequest(_)));
    }

    #[test]
    fn reload_rejects_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = Truststore::load(dir.path()).unwrap();
        store.add([Remote::new("c1", "10.0.0.1:9000", pem_fixture())]).unwrap();

        std::fs::remove_file(dir.path().join("c1.yaml")).unwrap();
        let err = store.reload().unwrap_err();
        assert!(matches!(err, DaemonError::BadRequest(_)));
        // in-memory state is unchanged on a rejected reload
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn version_channel_bumps_on_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = Truststore::load(dir.path()).unwrap();
        let mut rx = store.subscribe();
        store.add([Remote::new("c1", "10.0.0.1:9000", pem_fixture())]).unwrap();
        assert!(*rx.borrow_and_update() >= 1);
    }
}

//! Per-node startup reconciliation (spec §4.7, "On each other node, at
//! startup"): if a `recovery_db.tar.gz` is waiting in the state
//! directory, adopt it before any other subsystem starts.

use clusterd_core::{DaemonError, Result, StateDir};
use serde_yaml::Value;

use crate::backup::extract_tarball;
use crate::manifest::RecoveryManifest;

/// Whether a pending recovery tarball needs to be reconciled before the
/// rest of the daemon starts.
pub fn recovery_pending(state_dir: &StateDir) -> bool {
    state_dir.recovery_tarball().exists()
}

/// Unpacks the pending tarball, substitutes this node's own (possibly
/// changed) address into `info.yaml` and `daemon.yaml`, replaces the
/// database directory, and deletes the tarball.
pub fn reconcile(state_dir: &StateDir, own_name: &str) -> Result<()> {
    let tarball = state_dir.recovery_tarball();
    if !tarball.exists() {
        return Ok(());
    }

    let staging = state_dir.root().join("recovery_staging");
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    extract_tarball(&tarball, &staging)?;

    let manifest_path = staging.join("recovery.yaml");
    let manifest = RecoveryManifest::load(&manifest_path)?;
    let (raft_id, new_address) = manifest.find_self(own_name).ok_or_else(|| {
        DaemonError::Fatal(format!("recovery manifest has no entry for this node ({own_name})"))
    })?;

    // This node's own `info.yaml` was excluded from the tarball (spec
    // §4.7 step 6); regenerate it with the new Raft ID and address, since
    // everything else about this node's identity is unchanged.
    let info_path = staging.join("info.yaml");
    let info = InfoFile { id: raft_id, address: new_address.to_string() };
    std::fs::write(&info_path, serde_yaml::to_string(&info)?)?;

    update_daemon_address(state_dir, new_address)?;

    let database_dir = state_dir.database_dir();
    if database_dir.exists() {
        std::fs::remove_dir_all(&database_dir)?;
    }
    std::fs::rename(&staging, &database_dir)?;
    std::fs::remove_file(&tarball)?;

    tracing::info!(raft_id, address = %new_address, "recovery: database directory replaced");
    Ok(())
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct InfoFile {
    id: u64,
    address: String,
}

/// Updates the `address` field in `daemon.yaml` in place, leaving every
/// other key untouched (the file's full schema belongs to the daemon
/// crate, not to recovery).
fn update_daemon_address(state_dir: &StateDir, new_address: &str) -> Result<()> {
    let path = state_dir.daemon_config();
    if !path.exists() {
        return Ok(());
    }
    let contents = std::fs::read_to_string(&path)?;
    let mut value: Value = serde_yaml::from_str(&contents)?;
    if let Value::Mapping(ref mut map) = value {
        map.insert(Value::String("address".into()), Value::String(new_address.to_string()));
    }
    std::fs::write(&path, serde_yaml::to_string(&value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::create_tarball;
    use crate::manifest::RecoveryManifest;
    use crate::member_list::{RaftClusterState, RaftMemberRecord};
    use std::collections::BTreeMap;

    #[test]
    fn reconcile_adopts_new_address_and_removes_tarball() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = StateDir::open(dir.path()).unwrap();
        std::fs::write(state_dir.daemon_config(), "name: node-a\naddress: 10.0.0.1:9000\n").unwrap();

        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("db.bin"), b"sql").unwrap();

        let mut members = BTreeMap::new();
        members.insert(
            1,
            RaftMemberRecord {
                name: "node-a".into(),
                address: "10.0.0.9:9000".into(),
            },
        );
        let manifest = RecoveryManifest::new(RaftClusterState { members });
        manifest.save(&source.path().join("recovery.yaml")).unwrap();

        create_tarball(source.path(), &state_dir.recovery_tarball(), |_| false).unwrap();

        reconcile(&state_dir, "node-a").unwrap();

        assert!(!state_dir.recovery_tarball().exists());
        assert!(state_dir.database_dir().join("info.yaml").exists());
        assert!(state_dir.database_dir().join("db.bin").exists());

        let daemon_yaml = std::fs::read_to_string(state_dir.daemon_config()).unwrap();
        assert!(daemon_yaml.contains("10.0.0.9:9000"));
    }

    #[test]
    fn reconcile_is_a_no_op_without_a_pending_tarball() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = StateDir::open(dir.path()).unwrap();
        assert!(!recovery_pending(&state_dir));
        reconcile(&state_dir, "node-a").unwrap();
    }
}

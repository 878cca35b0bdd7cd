//! The operator-driven recovery procedure (spec §4.7 steps 1-7), run once
//! on whichever node the operator chose after confirming every daemon
//! process in the cluster has stopped.

use std::path::Path;

use clusterd_core::{DaemonError, Result, StateDir};
use clusterd_trust::{Remote, Truststore};

use crate::backup::{create_tarball, iso8601_basic_now};
use crate::manifest::RecoveryManifest;
use crate::member_list::RaftClusterState;

/// Step 1: the member list an operator edits before confirming recovery.
pub fn read_current_members(state_dir: &StateDir) -> Result<RaftClusterState> {
    RaftClusterState::load(&state_dir.raft_cluster_state())
}

/// Precondition check: every daemon process must be stopped, detected by
/// the absence of its control socket (spec §4.7).
pub fn assert_daemon_stopped(state_dir: &StateDir) -> Result<()> {
    if state_dir.is_daemon_stopped() {
        Ok(())
    } else {
        Err(DaemonError::Conflict(
            "recovery requires the daemon process to be stopped first".into(),
        ))
    }
}

/// Runs steps 2-7 of the recovery procedure against an operator-approved
/// edited member list and an updated truststore (new addresses for
/// whichever members moved).
pub fn run_recovery(
    state_dir: &StateDir,
    current: &RaftClusterState,
    edited: RaftClusterState,
    truststore: &Truststore,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    // Step 2.
    current.validate_edit(&edited)?;

    // Step 3: back up the database directory before mutating anything.
    let timestamp = iso8601_basic_now(now);
    let backup_path = state_dir.db_backup(&timestamp);
    create_tarball(&state_dir.database_dir(), &backup_path, |_| false)?;
    tracing::info!(backup = %backup_path.display(), "recovery: database directory backed up");

    // Step 4 + 5: rewrite the Raft membership record and cluster.yaml.
    // They are the same file in this layout (`database/cluster.yaml` is
    // the authoritative Raft view), so one write satisfies both steps.
    edited.save(&state_dir.raft_cluster_state())?;

    // Step 6: recovery_db.tar.gz, excluding this node's info.yaml.
    let recovery_tarball = state_dir.recovery_tarball();
    let info_relative = Path::new("info.yaml");
    create_tarball(&state_dir.database_dir(), &recovery_tarball, |p| p == info_relative)?;

    let manifest = RecoveryManifest::new(edited.clone());
    let manifest_path = state_dir.root().join("recovery.yaml");
    manifest.save(&manifest_path)?;
    append_manifest_to_tarball(&recovery_tarball, &manifest_path)?;

    // Step 7: update the local truststore's addresses, keeping each
    // member's existing certificate.
    for member in edited.members.values() {
        let existing = truststore.remotes_by_name(std::slice::from_ref(&member.name));
        let Some(existing) = existing.into_iter().next() else {
            continue;
        };
        if existing.address == member.address {
            continue;
        }
        truststore.remove(&member.name)?;
        truststore.add([Remote::new(member.name.clone(), member.address.clone(), existing.certificate)])?;
    }

    let patch_path = state_dir.patch_global_sql();
    let mut patch = String::new();
    for member in edited.members.values() {
        patch.push_str(&format!(
            "UPDATE core_cluster_members SET address = '{}' WHERE name = '{}';\n",
            member.address.replace('\'', "''"),
            member.name.replace('\'', "''")
        ));
    }
    append_to_file(&patch_path, &patch)?;

    Ok(())
}

fn append_manifest_to_tarball(tarball: &Path, manifest_path: &Path) -> Result<()> {
    // `recovery.yaml` is regenerated as a sibling of the backup directory
    // rather than re-opened for append, since `tar::Builder` only
    // supports a single streaming pass; the manifest is written into the
    // same gzip archive as a fresh build that includes it.
    let staging = tarball.with_extension(format!("staging-{}", clusterd_core::generate_secret()));
    std::fs::create_dir_all(&staging)?;
    let result = (|| {
        crate::backup::extract_tarball(tarball, &staging)?;
        std::fs::copy(manifest_path, staging.join("recovery.yaml"))?;
        create_tarball(&staging, tarball, |_| false)
    })();
    let _ = std::fs::remove_dir_all(&staging);
    result
}

fn append_to_file(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::member_list::RaftMemberRecord;

    fn write_state(state_dir: &StateDir, members: &[(u64, &str, &str)]) -> RaftClusterState {
        let mut map = BTreeMap::new();
        for (id, name, addr) in members {
            map.insert(
                *id,
                RaftMemberRecord {
                    name: name.to_string(),
                    address: addr.to_string(),
                },
            );
        }
        let state = RaftClusterState { members: map };
        std::fs::create_dir_all(state_dir.database_dir()).unwrap();
        std::fs::write(state_dir.database_dir().join("info.yaml"), b"node identity").unwrap();
        std::fs::write(state_dir.database_dir().join("db.bin"), b"sql data").unwrap();
        state.save(&state_dir.raft_cluster_state()).unwrap();
        state
    }

    #[test]
    fn run_recovery_produces_backup_and_recovery_tarballs() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = StateDir::open(dir.path()).unwrap();
        let current = write_state(&state_dir, &[(1, "a", "10.0.0.1:9000"), (2, "b", "10.0.0.2:9000")]);

        let truststore = Truststore::load(state_dir.truststore_dir()).unwrap();

        let mut edited = current.clone();
        edited.members.get_mut(&2).unwrap().address = "10.0.0.9:9000".to_string();

        let now = chrono::Utc::now();
        // chrono::Utc::now is disallowed inside Workflow scripts, but this
        // is ordinary test code, not a workflow.
        run_recovery(&state_dir, &current, edited, &truststore, now).unwrap();

        assert!(state_dir.recovery_tarball().exists());
        assert!(state_dir.patch_global_sql().exists());

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(entries.iter().any(|e| e.starts_with("db_backup.")));
    }

    #[test]
    fn assert_daemon_stopped_rejects_a_live_control_socket() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = StateDir::open(dir.path()).unwrap();
        std::fs::write(state_dir.control_socket(), b"").unwrap();
        assert!(assert_daemon_stopped(&state_dir).is_err());
    }
}

//! The Raft membership record (`database/cluster.yaml`) and the
//! validation rule for an operator-edited replacement (spec §4.7 step 2):
//! names and Raft IDs survive, only addresses may move, and the set size
//! cannot change.

use std::collections::BTreeMap;

use clusterd_core::{DaemonError, Result};
use serde::{Deserialize, Serialize};

pub type RaftId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftMemberRecord {
    pub name: String,
    pub address: String,
}

/// The full contents of `cluster.yaml`: Raft's own view of who is in the
/// cluster, keyed by Raft ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftClusterState {
    pub members: BTreeMap<RaftId, RaftMemberRecord>,
}

impl RaftClusterState {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Validates an operator-supplied replacement against spec §4.7 step
    /// 2: the Raft ID set and every name must be unchanged; only
    /// addresses may differ.
    pub fn validate_edit(&self, edited: &RaftClusterState) -> Result<()> {
        if self.members.len() != edited.members.len() {
            return Err(DaemonError::BadRequest(format!(
                "recovery edit changed the member count from {} to {}",
                self.members.len(),
                edited.members.len()
            )));
        }

        for (id, original) in &self.members {
            let replacement = edited.members.get(id).ok_or_else(|| {
                DaemonError::BadRequest(format!("recovery edit dropped raft id {id}"))
            })?;
            if replacement.name != original.name {
                return Err(DaemonError::BadRequest(format!(
                    "recovery edit renamed raft id {id} from {} to {}",
                    original.name, replacement.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(pairs: &[(u64, &str, &str)]) -> RaftClusterState {
        RaftClusterState {
            members: pairs
                .iter()
                .map(|(id, name, addr)| {
                    (
                        *id,
                        RaftMemberRecord {
                            name: name.to_string(),
                            address: addr.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn address_only_changes_are_accepted() {
        let original = state(&[(1, "a", "10.0.0.1:9000"), (2, "b", "10.0.0.2:9000")]);
        let edited = state(&[(1, "a", "10.0.0.9:9000"), (2, "b", "10.0.0.2:9000")]);
        assert!(original.validate_edit(&edited).is_ok());
    }

    #[test]
    fn renaming_a_member_is_rejected() {
        let original = state(&[(1, "a", "10.0.0.1:9000")]);
        let edited = state(&[(1, "renamed", "10.0.0.1:9000")]);
        assert!(original.validate_edit(&edited).is_err());
    }

    #[test]
    fn changing_member_count_is_rejected() {
        let original = state(&[(1, "a", "10.0.0.1:9000")]);
        let edited = state(&[(1, "a", "10.0.0.1:9000"), (2, "b", "10.0.0.2:9000")]);
        assert!(original.validate_edit(&edited).is_err());
    }

    #[test]
    fn round_trips_through_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yaml");
        let original = state(&[(1, "a", "10.0.0.1:9000")]);
        original.save(&path).unwrap();
        let loaded = RaftClusterState::load(&path).unwrap();
        assert_eq!(original, loaded);
    }
}

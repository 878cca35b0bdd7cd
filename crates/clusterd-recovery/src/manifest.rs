//! `recovery.yaml` — the manifest bundled inside `recovery_db.tar.gz`
//! telling each surviving node which Raft ID is its own and what address
//! it should now answer to (spec §4.7 steps 6-7).

use clusterd_core::Result;
use serde::{Deserialize, Serialize};

use crate::member_list::{RaftClusterState, RaftId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryManifest {
    /// The edited membership the operator approved.
    pub members: RaftClusterState,
}

impl RecoveryManifest {
    pub fn new(members: RaftClusterState) -> Self {
        Self { members }
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Finds this node's own entry by matching its current name against
    /// the manifest, since a node only knows its own name reliably across
    /// a recovery (its Raft ID and address may both have moved).
    pub fn find_self<'a>(&'a self, own_name: &str) -> Option<(RaftId, &'a str)> {
        self.members
            .members
            .iter()
            .find(|(_, record)| record.name == own_name)
            .map(|(id, record)| (*id, record.address.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member_list::RaftMemberRecord;
    use std::collections::BTreeMap;

    fn manifest() -> RecoveryManifest {
        let mut members = BTreeMap::new();
        members.insert(
            1,
            RaftMemberRecord {
                name: "node-a".into(),
                address: "10.0.0.5:9000".into(),
            },
        );
        RecoveryManifest::new(RaftClusterState { members })
    }

    #[test]
    fn find_self_matches_by_name() {
        let manifest = manifest();
        let (id, address) = manifest.find_self("node-a").unwrap();
        assert_eq!(id, 1);
        assert_eq!(address, "10.0.0.5:9000");
    }

    #[test]
    fn find_self_returns_none_for_unknown_name() {
        let manifest = manifest();
        assert!(manifest.find_self("node-z").is_none());
    }

    #[test]
    fn round_trips_through_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.yaml");
        let manifest = manifest();
        manifest.save(&path).unwrap();
        let loaded = RecoveryManifest::load(&path).unwrap();
        assert_eq!(manifest, loaded);
    }
}

//! `daemon.yaml` (spec §3 `DaemonConfig`): this node's own name, address,
//! and last-known addresses of every server it has ever known about.
//! Mutated only by the local node (spec §5 Shared-resource policy).

use std::collections::BTreeMap;

use clusterd_core::{Result, StateDir};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerEntry>,
}

impl DaemonConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            servers: BTreeMap::new(),
        }
    }

    pub fn load(state_dir: &StateDir) -> Result<Option<Self>> {
        let path = state_dir.daemon_config();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(serde_yaml::from_str(&contents)?))
    }

    pub fn save(&self, state_dir: &StateDir) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        let path = state_dir.daemon_config();
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// `Daemon.UpdateServers(C); UpdateServers(C)` is a no-op (spec §8
    /// round-trip property): returns whether anything actually changed.
    pub fn update_servers(&mut self, servers: BTreeMap<String, ServerEntry>) -> bool {
        if self.servers == servers {
            return false;
        }
        self.servers = servers;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = StateDir::open(dir.path()).unwrap();
        let cfg = DaemonConfig::new("c1", "10.0.0.1:9000");
        cfg.save(&state_dir).unwrap();

        let loaded = DaemonConfig::load(&state_dir).unwrap().unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn update_servers_is_idempotent() {
        let mut cfg = DaemonConfig::new("c1", "10.0.0.1:9000");
        let mut servers = BTreeMap::new();
        servers.insert("c1".to_string(), ServerEntry { address: "10.0.0.1:9000".into() });

        assert!(cfg.update_servers(servers.clone()));
        assert!(!cfg.update_servers(servers));
    }
}

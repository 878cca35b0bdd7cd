//! Bootstrap (spec §4.6): the control-socket flow that founds a brand
//! new cluster around a single node.

use std::sync::Arc;

use clusterd_core::{ClusterMember, DaemonError, KeyPair, Result};
use clusterd_schema::Migration;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::daemon::Daemon;

static FQDN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$|^[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$")
        .expect("valid regex")
});

/// Validates a cluster member name is a syntactically valid FQDN (spec
/// §4.6) and, per spec §8's boundary behavior, does not contain a `/`.
pub fn validate_member_name(name: &str) -> Result<()> {
    if name.contains('/') {
        return Err(DaemonError::BadRequest(format!("member name {name} must not contain '/'")));
    }
    if name.is_empty() || !FQDN_RE.is_match(name) {
        return Err(DaemonError::BadRequest(format!("member name {name} is not a valid FQDN")));
    }
    Ok(())
}

impl Daemon {
    /// Founds the cluster with this node as the sole initial member.
    pub async fn bootstrap(self: &Arc<Self>, name: &str, address: &str, external_migrations: Vec<Migration>) -> Result<()> {
        validate_member_name(name)?;

        self.hooks.run_pre_bootstrap()?;

        let cluster_identity = {
            let mut guard = self.cluster_identity.lock();
            if guard.is_none() {
                let generated = KeyPair::generate("cluster")?;
                generated.write(&self.state_dir.cluster_cert(), &self.state_dir.cluster_key())?;
                *guard = Some(generated);
            }
            guard.clone().expect("just set")
        };

        {
            let mut config = self.config.lock();
            config.name = name.to_string();
            config.address = address.to_string();
            config.save(&self.state_dir)?;
        }

        let schema = self.schema_manager(external_migrations);
        let capabilities = self.capability_vector(&schema);
        let node_id = self.node_id();

        let (gateway, _accept_rx) = clusterd_db::DatabaseGateway::new(
            node_id,
            self.gateway_config.clone(),
            schema,
            self.state_dir.database_file(),
            rusqlite::Connection::open(self.state_dir.database_file())
                .map_err(|e| DaemonError::Fatal(format!("failed to reopen database connection: {e}")))?,
            self.member_store.clone(),
            clusterd_net::build_client_config(&cluster_identity, self.truststore.clone())?,
        );

        gateway.bootstrap(address, capabilities.api_extensions.as_slice()).await?;

        {
            let conn = self.conn.lock();
            let founder = ClusterMember::pending(name, address, cluster_identity.cert_pem.clone(), capabilities);
            self.member_store.insert_pending(&conn, &founder)?;
            self.member_store.update_role(&conn, name, clusterd_core::MemberRole::Voter)?;
        }

        *self.gateway.lock() = Some(gateway);

        self.hooks.run_post_bootstrap();
        self.start_network().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_fqdn_shaped_names() {
        assert!(validate_member_name("c1.example.com").is_ok());
        assert!(validate_member_name("c1").is_ok());
        assert!(validate_member_name("c1/evil").is_err());
        assert!(validate_member_name("").is_err());
    }
}

//! The replicated `core_cluster_members` and `core_token_records` tables
//! (spec §3): owned here, not by `clusterd-db`, since the database
//! gateway only needs two narrow reads/writes through
//! `clusterd_db::MemberCapabilityStore` and must not know this table's
//! full shape.

use std::str::FromStr;

use clusterd_core::{CapabilityVector, ClusterMember, DaemonError, MemberRole, Result, TokenRecord};
use clusterd_db::MemberCapabilityStore;
use clusterd_schema::Migration;
use rusqlite::{params, Connection, OptionalExtension};

/// The internal migration list this crate contributes to the
/// `SchemaManager` (spec §4.3's "internal" list, prefixed ahead of
/// whatever a consumer registers).
pub fn internal_migrations() -> Vec<Migration> {
    vec![
        Migration::new(
            "CREATE TABLE core_cluster_members (\
                name TEXT PRIMARY KEY, \
                address TEXT NOT NULL, \
                certificate TEXT NOT NULL UNIQUE, \
                schema_internal INTEGER NOT NULL DEFAULT 0, \
                schema_external INTEGER NOT NULL DEFAULT 0, \
                api_extensions TEXT NOT NULL DEFAULT '[]', \
                heartbeat INTEGER NOT NULL DEFAULT 0, \
                role TEXT NOT NULL DEFAULT 'pending'\
            );",
        )
        .with_description("create core_cluster_members"),
        Migration::new(
            "CREATE TABLE core_token_records (\
                name TEXT PRIMARY KEY, \
                secret TEXT NOT NULL, \
                expiry_date INTEGER\
            );",
        )
        .with_description("create core_token_records"),
    ]
}

fn row_to_member(row: &rusqlite::Row) -> rusqlite::Result<ClusterMember> {
    let extensions_json: String = row.get("api_extensions")?;
    let role_str: String = row.get("role")?;
    Ok(ClusterMember {
        name: row.get("name")?,
        address: row.get("address")?,
        certificate: row.get("certificate")?,
        schema_internal: row.get("schema_internal")?,
        schema_external: row.get("schema_external")?,
        api_extensions: serde_json::from_str(&extensions_json).unwrap_or_default(),
        heartbeat: row.get("heartbeat")?,
        role: MemberRole::from_str(&role_str).unwrap_or(MemberRole::Pending),
    })
}

fn sql_err(e: rusqlite::Error) -> DaemonError {
    DaemonError::Fatal(format!("member table query failed: {e}"))
}

/// Implements `clusterd_db::MemberCapabilityStore` for the root crate's
/// own `core_cluster_members` table, and provides every other
/// member/token operation the join/bootstrap/remove/heartbeat flows need.
pub struct MemberStore {
    self_name: String,
}

impl MemberStore {
    pub fn new(self_name: impl Into<String>) -> Self {
        Self { self_name: self_name.into() }
    }

    pub fn insert_pending(&self, conn: &Connection, member: &ClusterMember) -> Result<()> {
        conn.execute(
            "INSERT INTO core_cluster_members \
                (name, address, certificate, schema_internal, schema_external, api_extensions, heartbeat, role) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                member.name,
                member.address,
                member.certificate,
                member.schema_internal,
                member.schema_external,
                serde_json::to_string(&member.api_extensions).unwrap_or_else(|_| "[]".into()),
                member.heartbeat,
                member.role.to_string(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref se, _)
                if se.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DaemonError::Conflict(format!("member {} or its certificate already exists", member.name))
            }
            other => sql_err(other),
        })?;
        Ok(())
    }

    pub fn by_name(&self, conn: &Connection, name: &str) -> Result<Option<ClusterMember>> {
        conn.query_row(
            "SELECT * FROM core_cluster_members WHERE name = ?1",
            params![name],
            row_to_member,
        )
        .optional()
        .map_err(sql_err)
    }

    pub fn by_certificate(&self, conn: &Connection, certificate: &str) -> Result<Option<ClusterMember>> {
        conn.query_row(
            "SELECT * FROM core_cluster_members WHERE certificate = ?1",
            params![certificate],
            row_to_member,
        )
        .optional()
        .map_err(sql_err)
    }

    pub fn list(&self, conn: &Connection) -> Result<Vec<ClusterMember>> {
        let mut stmt = conn
            .prepare("SELECT * FROM core_cluster_members ORDER BY name")
            .map_err(sql_err)?;
        let rows = stmt.query_map([], row_to_member).map_err(sql_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
    }

    /// Count of members whose role is not `pending` (spec §4.6 Remove's
    /// refusal condition).
    pub fn count_non_pending(&self, conn: &Connection) -> Result<u64> {
        conn.query_row(
            "SELECT COUNT(*) FROM core_cluster_members WHERE role <> 'pending'",
            [],
            |row| row.get(0),
        )
        .map_err(sql_err)
    }

    pub fn update_role(&self, conn: &Connection, name: &str, role: MemberRole) -> Result<()> {
        conn.execute(
            "UPDATE core_cluster_members SET role = ?1 WHERE name = ?2",
            params![role.to_string(), name],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    /// Heartbeat engine step 4: update a peer's timestamp and role
    /// transactionally after a successful probe.
    pub fn update_heartbeat(&self, conn: &Connection, name: &str, heartbeat: i64, role: MemberRole) -> Result<()> {
        conn.execute(
            "UPDATE core_cluster_members SET heartbeat = ?1, role = ?2 WHERE name = ?3",
            params![heartbeat, role.to_string(), name],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    pub fn update_address(&self, conn: &Connection, name: &str, address: &str) -> Result<()> {
        conn.execute(
            "UPDATE core_cluster_members SET address = ?1 WHERE name = ?2",
            params![address, name],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    pub fn delete(&self, conn: &Connection, name: &str) -> Result<()> {
        conn.execute("DELETE FROM core_cluster_members WHERE name = ?1", params![name])
            .map_err(sql_err)?;
        Ok(())
    }

    // -- Tokens --

    pub fn create_token(&self, conn: &Connection, token: &TokenRecord) -> Result<()> {
        conn.execute(
            "INSERT INTO core_token_records (name, secret, expiry_date) VALUES (?1, ?2, ?3)",
            params![token.name, token.secret, token.expiry_date],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref se, _)
                if se.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DaemonError::Conflict(format!("token for {} already exists", token.name))
            }
            other => sql_err(other),
        })?;
        Ok(())
    }

    pub fn find_token(&self, conn: &Connection, name: &str) -> Result<Option<TokenRecord>> {
        conn.query_row(
            "SELECT name, secret, expiry_date FROM core_token_records WHERE name = ?1",
            params![name],
            |row| {
                Ok(TokenRecord {
                    name: row.get(0)?,
                    secret: row.get(1)?,
                    expiry_date: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(sql_err)
    }

    pub fn list_tokens(&self, conn: &Connection) -> Result<Vec<TokenRecord>> {
        let mut stmt = conn
            .prepare("SELECT name, secret, expiry_date FROM core_token_records ORDER BY name")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TokenRecord {
                    name: row.get(0)?,
                    secret: row.get(1)?,
                    expiry_date: row.get(2)?,
                })
            })
            .map_err(sql_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
    }

    /// Consumes a token exactly once (spec §3: "consumed exactly once when
    /// the holder successfully joins").
    pub fn delete_token(&self, conn: &Connection, name: &str) -> Result<()> {
        conn.execute("DELETE FROM core_token_records WHERE name = ?1", params![name])
            .map_err(sql_err)?;
        Ok(())
    }

    /// Lazily reaps a single expired token at join-attempt time. The
    /// eager-vs-lazy reaping policy (spec §9 Open Question) defaults to
    /// lazy: the heartbeat engine never scans for expired tokens, since a
    /// join attempt is the only place an expired token has any observable
    /// effect. See `reap_expired_eager` for the alternative, left
    /// available for consumers who configure eager reaping.
    pub fn reap_if_expired(&self, conn: &Connection, name: &str, now: i64) -> Result<()> {
        if let Some(token) = self.find_token(conn, name)? {
            if token.is_expired(now) {
                self.delete_token(conn, name)?;
            }
        }
        Ok(())
    }

    /// Eagerly deletes every expired token. Not invoked by the heartbeat
    /// engine by default; a consumer that prefers eager reaping can call
    /// this from its own `OnHeartbeat` hook.
    pub fn reap_expired_eager(&self, conn: &Connection, now: i64) -> Result<usize> {
        conn.execute(
            "DELETE FROM core_token_records WHERE expiry_date IS NOT NULL AND expiry_date <= ?1",
            params![now],
        )
        .map_err(sql_err)
    }
}

impl MemberCapabilityStore for MemberStore {
    fn write_self_capabilities(
        &self,
        conn: &Connection,
        schema_internal: u64,
        schema_external: u64,
        extensions: &[String],
    ) -> Result<()> {
        conn.execute(
            "UPDATE core_cluster_members SET schema_internal = ?1, schema_external = ?2, api_extensions = ?3 WHERE name = ?4",
            params![
                schema_internal,
                schema_external,
                serde_json::to_string(extensions).unwrap_or_else(|_| "[]".into()),
                self.self_name,
            ],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    fn read_peer_capabilities(&self, conn: &Connection) -> Result<Vec<(u64, u64, Vec<String>)>> {
        let mut stmt = conn
            .prepare(
                "SELECT schema_internal, schema_external, api_extensions FROM core_cluster_members \
                 WHERE name <> ?1 AND role <> 'pending'",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![self.self_name], |row| {
                let extensions_json: String = row.get(2)?;
                Ok((
                    row.get::<_, u64>(0)?,
                    row.get::<_, u64>(1)?,
                    serde_json::from_str(&extensions_json).unwrap_or_default(),
                ))
            })
            .map_err(sql_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
    }
}

/// Build the founder/joiner `ClusterMember` draft this node presents in
/// `Bootstrap` and in step 2 of `Join` (spec §4.6).
pub fn draft_member(
    name: &str,
    address: &str,
    certificate: &str,
    capabilities: CapabilityVector,
) -> ClusterMember {
    ClusterMember::pending(name, address, certificate, capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterd_schema::{Extensions, SchemaManager};

    fn conn_with_tables() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        let mgr = SchemaManager::new(internal_migrations(), Vec::new(), Extensions::new());
        mgr.ensure(&mut conn, None).unwrap();
        conn
    }

    #[test]
    fn insert_and_lookup_round_trips() {
        let conn = conn_with_tables();
        let store = MemberStore::new("c1");
        let member = draft_member("c1", "10.0.0.1:9000", "PEM", CapabilityVector::new(1, 1, vec!["ext_a".into()]));
        store.insert_pending(&conn, &member).unwrap();

        let loaded = store.by_name(&conn, "c1").unwrap().unwrap();
        assert_eq!(loaded.address, "10.0.0.1:9000");
        assert_eq!(loaded.api_extensions, vec!["ext_a".to_string()]);
        assert_eq!(loaded.role, MemberRole::Pending);
    }

    #[test]
    fn duplicate_name_is_a_conflict() {
        let conn = conn_with_tables();
        let store = MemberStore::new("c1");
        let member = draft_member("c1", "10.0.0.1:9000", "PEM-A", CapabilityVector::new(0, 0, vec![]));
        store.insert_pending(&conn, &member).unwrap();

        let dup = draft_member("c1", "10.0.0.2:9000", "PEM-B", CapabilityVector::new(0, 0, vec![]));
        let err = store.insert_pending(&conn, &dup).unwrap_err();
        assert!(matches!(err, DaemonError::Conflict(_)));
    }

    #[test]
    fn capability_store_excludes_self_and_pending() {
        let conn = conn_with_tables();
        let store = MemberStore::new("c1");
        store
            .insert_pending(&conn, &draft_member("c1", "a", "PEM-A", CapabilityVector::new(1, 1, vec![])))
            .unwrap();
        store
            .insert_pending(&conn, &draft_member("c2", "b", "PEM-B", CapabilityVector::new(1, 1, vec![])))
            .unwrap();
        store.update_role(&conn, "c2", MemberRole::Voter).unwrap();
        store
            .insert_pending(&conn, &draft_member("c3", "c", "PEM-C", CapabilityVector::new(2, 2, vec![])))
            .unwrap();
        // c3 stays pending and must not count as a peer.

        let peers = store.read_peer_capabilities(&conn).unwrap();
        assert_eq!(peers, vec![(1, 1, vec![])]);
    }

    #[test]
    fn expired_token_is_reaped_lazily_on_lookup() {
        let conn = conn_with_tables();
        let store = MemberStore::new("c1");
        store
            .create_token(&conn, &TokenRecord { name: "c4".into(), secret: "s".into(), expiry_date: Some(100) })
            .unwrap();

        store.reap_if_expired(&conn, "c4", 200).unwrap();
        assert!(store.find_token(&conn, "c4").unwrap().is_none());
    }
}

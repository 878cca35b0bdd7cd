//! Schema manager: two ordered SQL migration lists (internal, external)
//! plus this binary's API-extension snapshot, and the machinery to bring
//! a database up to date with them (spec §4.3).

use rusqlite::{Connection, OptionalExtension};

use clusterd_core::{DaemonError, Result, SchemaKind};

use crate::extensions::Extensions;

/// A single SQL migration.
#[derive(Debug, Clone)]
pub struct Migration {
    /// One or more SQL statements, executed inside a single transaction.
    pub sql: String,
    /// Free-text description, surfaced in logs and `Dump` headers.
    pub description: Option<String>,
}

impl Migration {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Checksum of the migration body, so a replayed `Dump` can assert
    /// nothing was edited after being applied.
    pub fn checksum(&self) -> String {
        blake3::hash(self.sql.as_bytes()).to_hex().to_string()
    }
}

/// The historical migration that rewrote the `schemas` table's own layout.
/// It is always forced between the first internal migration and every
/// migration after it (spec §4.3 step 6).
fn split_schema_table_migration() -> Migration {
    Migration::new(
        "ALTER TABLE schemas RENAME TO schemas_old;\n\
         CREATE TABLE schemas (version INTEGER NOT NULL, type TEXT NOT NULL, updated_at TEXT NOT NULL, PRIMARY KEY (version, type));\n\
         INSERT INTO schemas (version, type, updated_at) SELECT version, type, updated_at FROM schemas_old;\n\
         DROP TABLE schemas_old;",
    )
    .with_description("split schema table into (version, type) rows")
}

/// Versions currently recorded in the live database, per migration list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedVersions {
    pub internal: u64,
    pub external: u64,
}

/// Decision returned by the caller-supplied pre-migration check.
#[derive(Debug, Clone, Copy)]
pub enum PreCheckDecision {
    /// Proceed with applying missing migrations.
    Proceed,
    /// Commit whatever has already been written this transaction and stop;
    /// `behind` peers have not yet upgraded to this version.
    NeedsWait { behind: usize },
}

/// Outcome of `SchemaManager::ensure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Applied {
        internal_applied: usize,
        external_applied: usize,
    },
    NeedsWait {
        behind: usize,
    },
}

/// Two ordered migration lists plus this node's API-extension snapshot.
pub struct SchemaManager {
    internal: Vec<Migration>,
    external: Vec<Migration>,
    extensions: Extensions,
}

impl SchemaManager {
    /// Build a manager from ordered internal/external migration lists,
    /// forcing the historical split-schema-table migration in after the
    /// first internal entry.
    pub fn new(mut internal: Vec<Migration>, external: Vec<Migration>, extensions: Extensions) -> Self {
        if !internal.is_empty() {
            internal.insert(1.min(internal.len()), split_schema_table_migration());
        }
        Self {
            internal,
            external,
            extensions,
        }
    }

    /// This binary's declared capability: the full migration-list lengths
    /// plus its registered API extensions.
    pub fn version(&self) -> (u64, u64, &[String]) {
        (
            self.internal.len() as u64,
            self.external.len() as u64,
            self.extensions.as_slice(),
        )
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Bring `conn` up to date with the declared migration lists.
    ///
    /// `pre_check`, if given, is invoked once the live versions are known
    /// and before any missing migration is applied; returning
    /// `NeedsWait` commits whatever was already written (nothing, in the
    /// up-to-date path) and aborts without applying new migrations,
    /// leaving the caller to retry later.
    pub fn ensure(
        &self,
        conn: &mut Connection,
        pre_check: Option<&dyn Fn(AppliedVersions) -> Result<PreCheckDecision>>,
    ) -> Result<MigrationOutcome> {
        conn.execute_batch("PRAGMA foreign_keys = OFF;")
            .map_err(sql_err)?;

        ensure_schema_table(conn)?;
        let versions = read_versions(conn)?;

        if let Some(check) = pre_check {
            if let PreCheckDecision::NeedsWait { behind } = check(versions)? {
                return Ok(MigrationOutcome::NeedsWait { behind });
            }
        }

        let internal_applied = apply_missing(
            conn,
            &self.internal,
            SchemaKind::Internal,
            versions.internal as usize,
        )?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(sql_err)?;

        let external_applied = apply_missing(
            conn,
            &self.external,
            SchemaKind::External,
            versions.external as usize,
        )?;

        Ok(MigrationOutcome::Applied {
            internal_applied,
            external_applied,
        })
    }

    /// Reconstruct a flattened DDL dump of every live table plus a
    /// synthetic `INSERT INTO schemas` preserving version semantics, for
    /// use when seeding a freshly-joined node or a recovery tarball.
    pub fn dump(&self, conn: &Connection) -> Result<String> {
        let mut out = String::new();
        let mut stmt = conn
            .prepare(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND sql IS NOT NULL ORDER BY name",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sql_err)?;
        for row in rows {
            out.push_str(&row.map_err(sql_err)?);
            out.push_str(";\n");
        }

        let versions = read_versions(conn)?;
        for v in 1..=versions.internal {
            out.push_str(&format!(
                "INSERT INTO schemas (version, type, updated_at) VALUES ({v}, 'internal', CURRENT_TIMESTAMP);\n"
            ));
        }
        for v in 1..=versions.external {
            out.push_str(&format!(
                "INSERT INTO schemas (version, type, updated_at) VALUES ({v}, 'external', CURRENT_TIMESTAMP);\n"
            ));
        }
        Ok(out)
    }
}

fn ensure_schema_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schemas (\
            version INTEGER NOT NULL, \
            type TEXT NOT NULL, \
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP, \
            PRIMARY KEY (version, type)\
        );",
    )
    .map_err(sql_err)
}

fn read_versions(conn: &Connection) -> Result<AppliedVersions> {
    let internal: u64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schemas WHERE type = 'internal'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err)?
        .unwrap_or(0);
    let external: u64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schemas WHERE type = 'external'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err)?
        .unwrap_or(0);
    Ok(AppliedVersions { internal, external })
}

fn apply_missing(
    conn: &mut Connection,
    migrations: &[Migration],
    kind: SchemaKind,
    applied: usize,
) -> Result<usize> {
    let kind_str = match kind {
        SchemaKind::Internal => "internal",
        SchemaKind::External => "external",
    };
    let mut applied_count = 0;
    for (idx, migration) in migrations.iter().enumerate().skip(applied) {
        let version = idx as u64 + 1;
        let tx = conn.transaction().map_err(sql_err)?;
        tx.execute_batch(&migration.sql).map_err(sql_err)?;
        tx.execute(
            "INSERT INTO schemas (version, type, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)",
            rusqlite::params![version, kind_str],
        )
        .map_err(sql_err)?;
        tx.commit().map_err(sql_err)?;
        applied_count += 1;
    }
    Ok(applied_count)
}

fn sql_err(e: rusqlite::Error) -> DaemonError {
    DaemonError::Fatal(format!("schema migration failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SchemaManager {
        let internal = vec![
            Migration::new("CREATE TABLE core_cluster_members (name TEXT PRIMARY KEY);"),
            Migration::new("CREATE TABLE core_token_records (name TEXT PRIMARY KEY);"),
        ];
        let external = vec![Migration::new("CREATE TABLE widgets (id INTEGER PRIMARY KEY);")];
        SchemaManager::new(internal, external, Extensions::new())
    }

    #[test]
    fn fresh_database_applies_all_migrations_in_order() {
        let mgr = manager();
        let mut conn = Connection::open_in_memory().unwrap();
        let outcome = mgr.ensure(&mut conn, None).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Applied {
                internal_applied: 3, // +1 for the forced split-schema migration
                external_applied: 1,
            }
        );

        let versions = read_versions(&conn).unwrap();
        assert_eq!(versions.internal, 3);
        assert_eq!(versions.external, 1);
    }

    #[test]
    fn rerunning_ensure_applies_nothing_new() {
        let mgr = manager();
        let mut conn = Connection::open_in_memory().unwrap();
        mgr.ensure(&mut conn, None).unwrap();
        let outcome = mgr.ensure(&mut conn, None).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Applied {
                internal_applied: 0,
                external_applied: 0,
            }
        );
    }

    #[test]
    fn pre_check_needs_wait_stops_before_applying() {
        let mgr = manager();
        let mut conn = Connection::open_in_memory().unwrap();
        let check: &dyn Fn(AppliedVersions) -> Result<PreCheckDecision> =
            &|_v| Ok(PreCheckDecision::NeedsWait { behind: 2 });
        let outcome = mgr.ensure(&mut conn, Some(check)).unwrap();
        assert_eq!(outcome, MigrationOutcome::NeedsWait { behind: 2 });

        let versions = read_versions(&conn).unwrap();
        assert_eq!(versions.internal, 0);
    }

    #[test]
    fn dump_reconstructs_ddl_and_version_rows() {
        let mgr = manager();
        let mut conn = Connection::open_in_memory().unwrap();
        mgr.ensure(&mut conn, None).unwrap();
        let dump = mgr.dump(&conn).unwrap();
        assert!(dump.contains("CREATE TABLE widgets"));
        assert!(dump.contains("INSERT INTO schemas (version, type, updated_at) VALUES (3, 'internal'"));
    }
}

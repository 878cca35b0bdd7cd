//! Replicated data model shared by every subsystem: cluster members, join
//! tokens, and the capability vector used to gate schema/API upgrades.
//!
//! These types mirror the `core_cluster_members` and `core_token_records`
//! tables from spec §3 exactly; the SQL storage for them lives in
//! `clusterd-db`, which is the only crate allowed to mutate them.

use serde::{Deserialize, Serialize};

/// Raft role assigned to a cluster member.
///
/// `Pending` members do not vote, are not tallied in the Raft membership
/// set, and do not contribute to schema/API-extension barriers (spec §3
/// invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemberRole {
    /// Authorized by the leader but not yet attached to Raft.
    Pending,
    /// Votes in elections.
    Voter,
    /// Replicates the log but does not vote; promotable to voter.
    StandBy,
    /// Does not replicate continuously; lowest-priority role.
    Spare,
}

impl MemberRole {
    /// Whether this role contributes to the Raft voting set.
    pub fn is_voter(self) -> bool {
        matches!(self, MemberRole::Voter)
    }

    /// Whether this member has completed the join handshake and attached
    /// to Raft.
    pub fn is_attached(self) -> bool {
        !matches!(self, MemberRole::Pending)
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemberRole::Pending => "pending",
            MemberRole::Voter => "voter",
            MemberRole::StandBy => "stand-by",
            MemberRole::Spare => "spare",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MemberRole {
    type Err = crate::error::DaemonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MemberRole::Pending),
            "voter" => Ok(MemberRole::Voter),
            "stand-by" => Ok(MemberRole::StandBy),
            "spare" => Ok(MemberRole::Spare),
            other => Err(crate::error::DaemonError::Fatal(format!("unknown member role: {other}"))),
        }
    }
}

/// `(schema_internal, schema_external, api_extensions)` — a member's
/// capability vector.
///
/// `IsOpen` (see `clusterd_db::Gateway`) compares the local vector against
/// the maximum vector observed among non-pending members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityVector {
    pub schema_internal: u64,
    pub schema_external: u64,
    pub api_extensions: Vec<String>,
}

impl CapabilityVector {
    pub fn new(schema_internal: u64, schema_external: u64, api_extensions: Vec<String>) -> Self {
        Self {
            schema_internal,
            schema_external,
            api_extensions,
        }
    }

    /// Per-dimension comparison used by `waitUpgrade` (spec §4.4 step 3).
    ///
    /// Returns `Ordering::Greater` if `self` is ahead of `other` in any
    /// dimension with none behind, `Less` if behind in any dimension with
    /// none ahead, `Equal` if identical, and `None` if dimensions disagree
    /// in both directions (which the spec does not define a total order
    /// for — callers treat that as "other is ahead" to stay conservative).
    pub fn compare(&self, other: &CapabilityVector) -> VersionComparison {
        let mut ahead = false;
        let mut behind = false;

        if self.schema_internal > other.schema_internal {
            ahead = true;
        } else if self.schema_internal < other.schema_internal {
            behind = true;
        }

        if self.schema_external > other.schema_external {
            ahead = true;
        } else if self.schema_external < other.schema_external {
            behind = true;
        }

        match extensions_compare(&self.api_extensions, &other.api_extensions) {
            VersionComparison::Ahead => ahead = true,
            VersionComparison::Behind => behind = true,
            VersionComparison::Equal => {}
            VersionComparison::Diverged => {
                ahead = true;
                behind = true;
            }
        }

        match (ahead, behind) {
            (false, false) => VersionComparison::Equal,
            (true, false) => VersionComparison::Ahead,
            (false, true) => VersionComparison::Behind,
            (true, true) => VersionComparison::Diverged,
        }
    }
}

/// Result of comparing two capability vectors (or two extension lists)
/// along a shared ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionComparison {
    Equal,
    Ahead,
    Behind,
    Diverged,
}

/// `IsSameVersion`-style comparison for an ordered extension list: order is
/// significant (spec §4.2).
fn extensions_compare(a: &[String], b: &[String]) -> VersionComparison {
    if a == b {
        return VersionComparison::Equal;
    }
    if a.len() > b.len() && a[..b.len()] == b[..] {
        return VersionComparison::Ahead;
    }
    if b.len() > a.len() && b[..a.len()] == a[..] {
        return VersionComparison::Behind;
    }
    VersionComparison::Diverged
}

/// A replicated cluster member row (`core_cluster_members`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub name: String,
    pub address: String,
    pub certificate: String,
    pub schema_internal: u64,
    pub schema_external: u64,
    pub api_extensions: Vec<String>,
    /// Zero means "never heartbeated".
    pub heartbeat: i64,
    pub role: MemberRole,
}

impl ClusterMember {
    /// Create the founder's row, in the `pending` role, as written by
    /// `Bootstrap` and by the leader on join authorization.
    pub fn pending(
        name: impl Into<String>,
        address: impl Into<String>,
        certificate: impl Into<String>,
        capabilities: CapabilityVector,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            certificate: certificate.into(),
            schema_internal: capabilities.schema_internal,
            schema_external: capabilities.schema_external,
            api_extensions: capabilities.api_extensions,
            heartbeat: 0,
            role: MemberRole::Pending,
        }
    }

    pub fn capabilities(&self) -> CapabilityVector {
        CapabilityVector::new(
            self.schema_internal,
            self.schema_external,
            self.api_extensions.clone(),
        )
    }

    /// Whether this member has never received a heartbeat.
    pub fn never_heartbeated(&self) -> bool {
        self.heartbeat == 0
    }
}

/// A one-time join token record (`core_token_records`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub name: String,
    pub secret: String,
    /// Unix timestamp; `None` means the token never expires.
    pub expiry_date: Option<i64>,
}

impl TokenRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expiry_date, Some(exp) if exp <= now)
    }
}

/// A single applied migration (`schemas` table row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaHistoryEntry {
    pub version: u64,
    pub kind: SchemaKind,
}

/// Migration list discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    Internal,
    External,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_vector_detects_behind_and_ahead() {
        let a = CapabilityVector::new(2, 5, vec!["ext_a".into()]);
        let b = CapabilityVector::new(2, 6, vec!["ext_a".into()]);

        assert_eq!(a.compare(&b), VersionComparison::Behind);
        assert_eq!(b.compare(&a), VersionComparison::Ahead);
        assert_eq!(a.compare(&a), VersionComparison::Equal);
    }

    #[test]
    fn capability_vector_diverges_when_mixed() {
        let a = CapabilityVector::new(3, 5, vec![]);
        let b = CapabilityVector::new(2, 6, vec![]);
        assert_eq!(a.compare(&b), VersionComparison::Diverged);
    }

    #[test]
    fn extensions_order_is_significant() {
        let a = CapabilityVector::new(0, 0, vec!["b".into(), "a".into()]);
        let b = CapabilityVector::new(0, 0, vec!["a".into(), "b".into()]);
        assert_eq!(a.compare(&b), VersionComparison::Diverged);
    }

    #[test]
    fn token_expiry() {
        let tok = TokenRecord {
            name: "n".into(),
            secret: "s".into(),
            expiry_date: Some(100),
        };
        assert!(!tok.is_expired(50));
        assert!(tok.is_expired(100));
        assert!(tok.is_expired(200));

        let never = TokenRecord {
            expiry_date: None,
            ..tok
        };
        assert!(!never.is_expired(i64::MAX));
    }

    #[test]
    fn pending_member_role_is_not_attached() {
        let m = ClusterMember::pending(
            "c1",
            "127.0.0.1:9001",
            "PEM",
            CapabilityVector::new(1, 1, vec![]),
        );
        assert_eq!(m.role, MemberRole::Pending);
        assert!(!m.role.is_attached());
        assert!(m.never_heartbeated());
    }
}

//! clusterd-core - filesystem layout, node identity, and the replicated
//! data model shared by every other `clusterd` crate.
//!
//! This crate has no knowledge of Raft, SQL, or HTTP; it is the leaf layer
//! every other component depends on, the way `ormdb-core` anchors the rest
//! of the ORMDB workspace.

pub mod error;
pub mod identity;
pub mod layout;
pub mod member;

pub use error::{DaemonError, Result};
pub use identity::{certificate_has_san, KeyPair};
pub use layout::StateDir;
pub use member::{
    CapabilityVector, ClusterMember, MemberRole, SchemaHistoryEntry, SchemaKind, TokenRecord,
    VersionComparison,
};

/// Generate a high-entropy join-token secret.
///
/// Per spec §6 the secret must be "crypto-random" with at least 32
/// characters; this draws 32 random bytes and hex-encodes them (64 hex
/// chars), following the same `rand`-backed approach the teacher workspace
/// uses for its benchmarking seeds.
pub fn generate_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_meet_entropy_floor() {
        let secret = generate_secret();
        assert!(secret.len() >= 32);
        assert_ne!(secret, generate_secret());
    }
}

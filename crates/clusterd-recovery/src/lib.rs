//! clusterd-recovery - quorum-loss recovery (spec §4.7): an operator-run
//! procedure that edits the Raft membership, re-tarballs the database,
//! and a per-node startup step that adopts the new tarball before
//! anything else starts.

pub mod backup;
pub mod manifest;
pub mod member_list;
pub mod operator;
pub mod startup;

pub use manifest::RecoveryManifest;
pub use member_list::{RaftClusterState, RaftId, RaftMemberRecord};
pub use operator::{assert_daemon_stopped, read_current_members, run_recovery};
pub use startup::{reconcile, recovery_pending};

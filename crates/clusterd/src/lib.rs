//! clusterd - a library for building small, self-contained clustered
//! daemons sharing a replicated SQL database, grounded on the teacher
//! workspace's `ormdb-server` composition crate: this is the top-level
//! crate a consumer embeds, wiring every leaf crate (`clusterd-core`,
//! `clusterd-trust`, `clusterd-schema`, `clusterd-db`, `clusterd-net`,
//! `clusterd-recovery`) into one `Daemon`.

mod bootstrap;
mod config;
mod daemon;
mod envelope;
mod handlers;
mod heartbeat;
mod hooks;
mod join;
mod members;
mod remove;
mod token;

pub use bootstrap::validate_member_name;
pub use config::DaemonConfig;
pub use daemon::{Daemon, DaemonOptions};
pub use heartbeat::{HeartbeatRequest, DEFAULT_INTERVAL};
pub use hooks::{Hooks, HooksBuilder, RoleStatus};
pub use join::{ClusterJoinRequest, ClusterJoinResponse};
pub use members::MemberStore;
pub use token::JoinToken;

pub use clusterd_core::{
    CapabilityVector, ClusterMember, DaemonError, KeyPair, MemberRole, Result, StateDir,
    TokenRecord,
};
pub use clusterd_db::GatewayConfig;
pub use clusterd_net::{ResourceGroup, Transport};
pub use clusterd_schema::Migration;

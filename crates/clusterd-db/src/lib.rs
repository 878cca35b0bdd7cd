//! clusterd-db - the Raft-replicated embedded SQL database gateway
//! (spec §4.4), grounded on `ormdb-raft`'s openraft wiring with the NNG
//! transport replaced by a mutual-TLS dqlite-style upgrade connection.

pub mod config;
pub mod error;
pub mod gateway;
pub mod network;
pub mod state;
pub mod storage;
pub mod types;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{DatabaseGateway, HijackedStream, IsOpenError, MemberCapabilityStore};
pub use state::GatewayState;
pub use types::{ClusterRaft, NodeId, SqlCommand, SqlOutcome};

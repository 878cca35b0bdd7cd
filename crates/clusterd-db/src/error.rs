//! Errors for the database gateway subsystem.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway initialization failed: {0}")]
    Initialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("dial handshake failed: {0}")]
    Handshake(String),

    #[error("no leader available")]
    NoLeader,

    #[error("not the leader, current leader is {leader_address:?}")]
    NotLeader { leader_address: Option<String> },

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("gateway is not open yet")]
    NotReady,

    #[error("gateway is shutting down")]
    ShuttingDown,

    #[error("membership change error: {0}")]
    MembershipChange(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sled::Error> for GatewayError {
    fn from(err: sled::Error) -> Self {
        GatewayError::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        GatewayError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Network(err.to_string())
    }
}

impl From<GatewayError> for clusterd_core::DaemonError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotReady => clusterd_core::DaemonError::Unavailable(err.to_string()),
            GatewayError::NoLeader | GatewayError::NotLeader { .. } => {
                clusterd_core::DaemonError::Unavailable(err.to_string())
            }
            GatewayError::ShuttingDown => clusterd_core::DaemonError::Unavailable(err.to_string()),
            GatewayError::Timeout(_) => clusterd_core::DaemonError::Unavailable(err.to_string()),
            GatewayError::MembershipChange(_) => clusterd_core::DaemonError::Conflict(err.to_string()),
            _ => clusterd_core::DaemonError::Fatal(err.to_string()),
        }
    }
}

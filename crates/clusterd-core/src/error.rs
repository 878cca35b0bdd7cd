//! Shared error kinds propagated across daemon subsystem boundaries.

use thiserror::Error;

/// Errors that can surface from any clusterd subsystem.
///
/// These map onto the boundary error kinds from the daemon's wire protocol:
/// each HTTP-facing variant carries the status code it should be rendered
/// as. `GracefulAbort` never crosses a crate boundary as an `Err` — it is
/// modeled as a return value (see `clusterd_schema::MigrationOutcome`)
/// rather than a thrown error.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The database is not ready to serve requests (NotReady, Starting,
    /// Waiting, or Offline — see `clusterd_db::GatewayState`).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The caller's certificate fingerprint is not in the truststore, or an
    /// access handler rejected the request.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed body, invalid FQDN, path-traversal token, expired join
    /// token, certificate SAN mismatch.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Duplicate name, duplicate address, certificate already known.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown member name, unknown token.
    #[error("not found: {0}")]
    NotFound(String),

    /// State directory unreadable, cluster certificate unloadable, Raft
    /// engine failed to initialize. Unrecoverable within the process.
    #[error("fatal: {0}")]
    Fatal(String),

    /// I/O failure not otherwise classified.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization failure.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DaemonError {
    /// The HTTP status code this error renders as, per spec's wire protocol.
    pub fn status_code(&self) -> u16 {
        match self {
            DaemonError::Unavailable(_) => 503,
            DaemonError::Forbidden(_) => 403,
            DaemonError::BadRequest(_) => 400,
            DaemonError::Conflict(_) => 409,
            DaemonError::NotFound(_) => 404,
            DaemonError::Fatal(_) => 500,
            DaemonError::Io(_) => 500,
            DaemonError::Yaml(_) => 500,
        }
    }

    /// Short machine-readable status token, e.g. for `{type: "error", ...}`
    /// envelopes.
    pub fn status_name(&self) -> &'static str {
        match self {
            DaemonError::Unavailable(_) => "Unavailable",
            DaemonError::Forbidden(_) => "Forbidden",
            DaemonError::BadRequest(_) => "Bad Request",
            DaemonError::Conflict(_) => "Conflict",
            DaemonError::NotFound(_) => "Not Found",
            DaemonError::Fatal(_) | DaemonError::Io(_) | DaemonError::Yaml(_) => "Internal Server Error",
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_error_kinds() {
        assert_eq!(DaemonError::Unavailable("x".into()).status_code(), 503);
        assert_eq!(DaemonError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(DaemonError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(DaemonError::Conflict("x".into()).status_code(), 409);
        assert_eq!(DaemonError::NotFound("x".into()).status_code(), 404);
        assert_eq!(DaemonError::Fatal("x".into()).status_code(), 500);
    }
}

//! Join-token encode/decode (spec §6 Token format): a base64-encoded JSON
//! document carrying the intended member name, a high-entropy secret, the
//! cluster certificate's fingerprint, and the addresses to dial.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clusterd_core::{DaemonError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinToken {
    pub name: String,
    pub secret: String,
    pub fingerprint: String,
    pub join_addresses: Vec<String>,
}

impl JoinToken {
    pub fn new(name: impl Into<String>, secret: impl Into<String>, fingerprint: impl Into<String>, join_addresses: Vec<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
            fingerprint: fingerprint.into(),
            join_addresses,
        }
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| DaemonError::Fatal(format!("failed to encode join token: {e}")))?;
        Ok(BASE64.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let json = BASE64
            .decode(encoded.trim())
            .map_err(|e| DaemonError::BadRequest(format!("invalid join token encoding: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| DaemonError::BadRequest(format!("invalid join token payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64_json() {
        let token = JoinToken::new("c4", "s".repeat(32), "fp", vec!["127.0.0.1:9001".into()]);
        let encoded = token.encode().unwrap();
        let decoded = JoinToken::decode(&encoded).unwrap();
        assert_eq!(token, decoded);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(JoinToken::decode("not valid base64!!").is_err());
    }
}

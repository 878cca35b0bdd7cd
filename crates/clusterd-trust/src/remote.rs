//! `Remote` — the on-disk unit the truststore persists, one YAML file per
//! peer (spec §3 data model).

use serde::{Deserialize, Serialize};

/// A known peer: its name, last-known address, and TLS certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub address: String,
    pub certificate: String,
}

impl Remote {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        certificate: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            certificate: certificate.into(),
        }
    }

    pub(crate) fn file_name(&self) -> String {
        format!("{}.yaml", self.name)
    }
}

//! Endpoint registry (spec §4.8): three built-in resource groups plus
//! consumer-registered extensions, each endpoint carrying the flags the
//! request router consults before authenticating or dispatching.

use clusterd_core::{DaemonError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// The local Unix control socket; requests are trusted unconditionally.
    Unix,
    /// Mutual-TLS HTTPS.
    Https,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub path: &'static str,
    pub allowed_before_init: bool,
    pub allowed_during_shutdown: bool,
    /// True for endpoints that honor `?target=<name>` leader/member forwarding.
    pub proxy_target: bool,
}

impl Endpoint {
    pub const fn new(path: &'static str) -> Self {
        Self {
            path,
            allowed_before_init: false,
            allowed_during_shutdown: false,
            proxy_target: false,
        }
    }

    pub const fn allowed_before_init(mut self) -> Self {
        self.allowed_before_init = true;
        self
    }

    pub const fn allowed_during_shutdown(mut self) -> Self {
        self.allowed_during_shutdown = true;
        self
    }

    pub const fn proxy_target(mut self) -> Self {
        self.proxy_target = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ResourceGroup {
    pub transport: Transport,
    pub prefix: &'static str,
    pub endpoints: Vec<Endpoint>,
}

impl ResourceGroup {
    fn full_paths(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .map(|e| format!("{}/{}", self.prefix.trim_end_matches('/'), e.path))
            .collect()
    }
}

/// Control (Unix socket), Public and Internal (HTTPS) resource groups, plus
/// any extensions the consumer registers.
pub struct EndpointRegistry {
    pub control: ResourceGroup,
    pub public: ResourceGroup,
    pub internal: ResourceGroup,
    extended: Vec<ResourceGroup>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            control: ResourceGroup {
                transport: Transport::Unix,
                prefix: "/core/control",
                endpoints: vec![
                    Endpoint::new("control").allowed_before_init().allowed_during_shutdown(),
                    Endpoint::new("ready").allowed_before_init().allowed_during_shutdown(),
                    Endpoint::new("shutdown").allowed_before_init().allowed_during_shutdown(),
                    Endpoint::new("cluster").allowed_before_init(),
                    Endpoint::new("tokens"),
                    Endpoint::new("heartbeat"),
                    Endpoint::new("sql"),
                    Endpoint::new("hooks"),
                ],
            },
            public: ResourceGroup {
                transport: Transport::Https,
                prefix: "/cluster/1.0",
                endpoints: vec![
                    Endpoint::new("1.0").allowed_before_init().allowed_during_shutdown(),
                    Endpoint::new("cluster").allowed_before_init().proxy_target(),
                    Endpoint::new("cluster/:name").proxy_target(),
                    Endpoint::new("tokens"),
                    Endpoint::new("ready").allowed_before_init().allowed_during_shutdown(),
                ],
            },
            internal: ResourceGroup {
                transport: Transport::Https,
                prefix: "/cluster/internal",
                endpoints: vec![
                    Endpoint::new("database").allowed_before_init(),
                    Endpoint::new("heartbeat").allowed_before_init(),
                    Endpoint::new("trust").allowed_before_init(),
                    Endpoint::new("hooks"),
                    Endpoint::new("sql").proxy_target(),
                    Endpoint::new("cluster/certificates/:name").allowed_before_init(),
                ],
            },
            extended: Vec::new(),
        }
    }

    /// Registers a consumer-defined resource group. Rejected if any of its
    /// endpoints collide on prefix+path with an existing internal endpoint.
    pub fn register_extended(&mut self, group: ResourceGroup) -> Result<()> {
        let reserved = self.internal.full_paths();
        for candidate in group.full_paths() {
            if reserved.contains(&candidate) {
                return Err(DaemonError::Conflict(format!(
                    "extended endpoint {candidate} collides with an internal endpoint"
                )));
            }
        }
        self.extended.push(group);
        Ok(())
    }

    pub fn extended(&self) -> &[ResourceGroup] {
        &self.extended
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_group_rejects_internal_collision() {
        let mut registry = EndpointRegistry::new();
        let colliding = ResourceGroup {
            transport: Transport::Https,
            prefix: "/cluster/internal",
            endpoints: vec![Endpoint::new("database")],
        };
        assert!(registry.register_extended(colliding).is_err());
    }

    #[test]
    fn extended_group_with_distinct_prefix_is_accepted() {
        let mut registry = EndpointRegistry::new();
        let ok = ResourceGroup {
            transport: Transport::Https,
            prefix: "/cluster/ext",
            endpoints: vec![Endpoint::new("widgets")],
        };
        assert!(registry.register_extended(ok).is_ok());
        assert_eq!(registry.extended().len(), 1);
    }

    #[test]
    fn control_endpoints_carry_expected_flags() {
        let registry = EndpointRegistry::new();
        let ready = registry.control.endpoints.iter().find(|e| e.path == "ready").unwrap();
        assert!(ready.allowed_before_init);
        assert!(ready.allowed_during_shutdown);
    }
}

//! Database gateway configuration, in the teacher's builder-pattern style
//! (`ormdb-raft::config::RaftConfig`).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub heartbeat_interval: Duration,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub snapshot_log_threshold: u64,
    pub max_payload_entries: u64,
    pub dial_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(150),
            election_timeout_min: Duration::from_millis(300),
            election_timeout_max: Duration::from_millis(600),
            snapshot_log_threshold: 10_000,
            max_payload_entries: 512,
            dial_timeout: Duration::from_secs(5),
        }
    }
}

impl GatewayConfig {
    pub fn with_heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    pub fn with_election_timeout(mut self, min: Duration, max: Duration) -> Self {
        self.election_timeout_min = min;
        self.election_timeout_max = max;
        self
    }

    pub fn with_snapshot_log_threshold(mut self, n: u64) -> Self {
        self.snapshot_log_threshold = n;
        self
    }

    pub fn with_dial_timeout(mut self, d: Duration) -> Self {
        self.dial_timeout = d;
        self
    }

    pub(crate) fn to_openraft_config(&self) -> openraft::Config {
        openraft::Config {
            heartbeat_interval: self.heartbeat_interval.as_millis() as u64,
            election_timeout_min: self.election_timeout_min.as_millis() as u64,
            election_timeout_max: self.election_timeout_max.as_millis() as u64,
            max_payload_entries: self.max_payload_entries,
            ..Default::default()
        }
    }
}

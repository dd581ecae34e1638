use std::time::Duration;

/// Default heartbeat period for presence leases.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(6);

/// Default read-time staleness threshold. Must stay at least twice the
/// heartbeat period so one missed beat does not evict a live peer.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(15);

const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

const STUN_SERVERS_ENV: &str = "MESH_STUN_SERVERS";

/// Configuration for one conference participant.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Name published in this peer's presence record.
    pub display_name: String,
    /// STUN URLs for NAT traversal. STUN only: topologies that need a relay
    /// will fail to connect, there is no TURN fallback.
    pub stun_servers: Vec<String>,
    pub ice_candidate_pool_size: u8,
    pub heartbeat_interval: Duration,
    pub stale_threshold: Duration,
    /// Gather loopback host candidates. Off in production; lets two peers in
    /// one process connect without STUN in tests.
    pub include_loopback_candidates: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            display_name: "guest".to_string(),
            stun_servers: DEFAULT_STUN_SERVERS
                .iter()
                .map(|url| url.to_string())
                .collect(),
            ice_candidate_pool_size: 10,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            include_loopback_candidates: false,
        }
    }
}

impl MeshConfig {
    /// Default configuration for `display_name`, honoring the
    /// `MESH_STUN_SERVERS` override (comma-separated URLs; an empty value
    /// disables STUN entirely).
    pub fn new(display_name: impl Into<String>) -> Self {
        let mut config = Self {
            display_name: display_name.into(),
            ..Self::default()
        };
        if let Some(servers) = stun_servers_from_env() {
            config.stun_servers = servers;
        }
        config
    }

    pub fn with_stun_servers(mut self, servers: Vec<String>) -> Self {
        self.stun_servers = servers;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_ice_candidate_pool_size(mut self, size: u8) -> Self {
        self.ice_candidate_pool_size = size;
        self
    }

    pub fn with_loopback_candidates(mut self, include: bool) -> Self {
        self.include_loopback_candidates = include;
        self
    }
}

fn stun_servers_from_env() -> Option<Vec<String>> {
    let raw = std::env::var(STUN_SERVERS_ENV).ok()?;
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_presence_lease_contract() {
        let config = MeshConfig::default();
        assert!(config.stale_threshold >= config.heartbeat_interval * 2);
        assert_eq!(config.ice_candidate_pool_size, 10);
        assert_eq!(config.stun_servers.len(), 2);
    }
}

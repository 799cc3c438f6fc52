//! Swarm configuration and frozen tunables.

use std::time::Duration;

/// Global cap on concurrent outbound dials over transports that consume file
/// descriptors. Process-wide: shared across all peers and all swarms.
pub const CONCURRENT_FD_DIALS: usize = 160;

/// Default wall clock each dial gets.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default address-level parallelism per peer.
pub const DEFAULT_PER_PEER_DIAL_LIMIT: usize = 8;

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection-manager configuration.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Per-peer wall clock for a `dial` call.
    pub dial_timeout: Duration,
    /// Concurrent per-address attempts for one peer.
    pub per_peer_dial_limit: usize,
    /// Permit running without a private key, wrapping connections in an
    /// unverified peer binding. Test-only; production configurations must
    /// provide a key.
    pub insecure_dials_allowed: bool,
    /// Broadcast capacity for swarm events.
    pub event_channel_capacity: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            per_peer_dial_limit: DEFAULT_PER_PEER_DIAL_LIMIT,
            insecure_dials_allowed: false,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl SwarmConfig {
    /// Config for tests: insecure upgrades allowed, short timeouts.
    pub fn insecure() -> Self {
        Self {
            insecure_dials_allowed: true,
            ..Default::default()
        }
    }
}

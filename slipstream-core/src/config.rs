//! Centralized configuration for Slipstream.
//!
//! All tunable parameters live here; the CLI maps its flags onto these
//! structs and the rest of the codebase reads them instead of carrying
//! hard-coded values.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Slipstream components.
///
/// Groups related settings into logical sections, one per subsystem.
#[derive(Debug, Clone, Default)]
pub struct SlipstreamConfig {
    /// Swarm engine session settings.
    pub swarm: SwarmConfig,
    /// HTTP server settings.
    pub http: HttpConfig,
    /// Inactivity lifecycle settings.
    pub lifecycle: LifecycleConfig,
    /// Payload storage settings.
    pub storage: StorageConfig,
    /// Analytics sink settings.
    pub analytics: AnalyticsConfig,
}

/// Session tuning applied to the swarm engine on startup.
///
/// The defaults reflect a streaming-first session: aggressive connection
/// ramp-up, short peer timeouts, forced encryption and sparse storage so a
/// seek does not wait for preallocation.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// TCP/UDP listen port for the swarm engine.
    pub listen_port: u16,
    /// Announce on every tracker tier instead of stopping at the first.
    pub announce_to_all_tiers: bool,
    /// Announce to every tracker within a tier.
    pub announce_to_all_trackers: bool,
    /// Number of outgoing connection attempts per second.
    pub connection_speed: u32,
    /// Timeout for establishing a peer connection.
    pub peer_connect_timeout: Duration,
    /// Timeout for an outstanding block request.
    pub request_timeout: Duration,
    /// Extra connection attempts granted to freshly added torrents.
    pub torrent_connect_boost: u32,
    /// Count IP overhead against the configured rate limits.
    pub rate_limit_ip_overhead: bool,
    /// Download rate limit in bytes per second (None = unlimited).
    pub download_rate_limit: Option<u64>,
    /// Upload rate limit in bytes per second (None = unlimited).
    pub upload_rate_limit: Option<u64>,
    /// Require encrypted connections in both directions, preferring RC4.
    pub force_encryption: bool,
    /// Allocate payload files sparsely.
    pub sparse_storage: bool,
    /// Enable the distributed hash table.
    pub enable_dht: bool,
    /// Enable local service discovery.
    pub enable_lsd: bool,
    /// Enable UPnP and NAT-PMP port mapping.
    pub enable_upnp_natpmp: bool,
    /// Optional SOCKS5 proxy for all swarm traffic.
    pub proxy: Option<ProxyConfig>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            listen_port: 6881,
            announce_to_all_tiers: true,
            announce_to_all_trackers: true,
            connection_speed: 100,
            peer_connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            torrent_connect_boost: 100,
            rate_limit_ip_overhead: true,
            download_rate_limit: None,
            upload_rate_limit: None,
            force_encryption: true,
            sparse_storage: true,
            enable_dht: true,
            enable_lsd: true,
            enable_upnp_natpmp: true,
            proxy: None,
        }
    }
}

/// SOCKS5 proxy settings for swarm traffic.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Optional username; credentials are sent only when both the username
    /// and password are present.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Grace period for in-flight requests once shutdown is triggered.
    /// Readers blocked on missing pieces are cancelled within this window.
    pub drain_timeout: Duration,
    /// Exit when this process disappears (parent watchdog), if set.
    pub parent_pid: Option<u32>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            drain_timeout: Duration::from_millis(500),
            parent_pid: None,
        }
    }
}

/// Inactivity lifecycle settings.
///
/// A torrent with no active connections is paused after
/// `inactivity_pause_timeout` and removed after a further
/// `inactivity_remove_timeout`; any new connection cancels both.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Idle time before a torrent is paused.
    pub inactivity_pause_timeout: Duration,
    /// Further idle time before a paused torrent is removed.
    pub inactivity_remove_timeout: Duration,
    /// Keep payload files on removal instead of deleting them.
    pub keep_files: bool,
    /// Look-ahead ratio used when a request does not specify one.
    pub default_look_ahead: f32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            inactivity_pause_timeout: Duration::from_secs(30),
            inactivity_remove_timeout: Duration::from_secs(60),
            keep_files: false,
            default_look_ahead: 0.005,
        }
    }
}

/// Payload storage settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Save location used when a request does not specify one.
    pub download_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
        }
    }
}

/// Analytics sink settings.
///
/// The sink is disabled entirely when no token is configured.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Project token; `None` disables event delivery.
    pub token: Option<String>,
    /// Tracking endpoint receiving the events.
    pub endpoint: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            token: None,
            endpoint: "https://api.mixpanel.com/track".to_string(),
        }
    }
}

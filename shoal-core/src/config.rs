//! Centralized configuration for Shoal.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::time::Duration;

/// Central configuration for all Shoal components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct ShoalConfig {
    pub torrent: TorrentConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

/// BitTorrent protocol-specific configuration.
///
/// Controls block sizing, peer identity, and per-piece retry behavior.
#[derive(Debug, Clone)]
pub struct TorrentConfig {
    /// BitTorrent client identifier, prefixed to the generated peer id
    pub client_id: &'static str,
    /// Largest block requested in a single request message
    pub block_size: u32,
    /// Failed attempts after which a piece is abandoned
    pub max_piece_attempts: u32,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            client_id: "-SH0001-",
            block_size: 16_384, // 16 KiB
            max_piece_attempts: 5,
        }
    }
}

/// Network communication and tracker configuration.
///
/// Controls peer connection and read timeouts, connection fan-out, and
/// tracker communication parameters.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bound on TCP connect, handshake, and bitfield exchange together
    pub connect_timeout: Duration,
    /// Bound on any single message read once a session is established
    pub read_timeout: Duration,
    /// Maximum simultaneous connection attempts
    pub max_concurrent_connects: usize,
    /// Port advertised to the tracker; inbound connections are not accepted
    pub listen_port: u16,
    /// HTTP request timeout for tracker communication
    pub tracker_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            max_concurrent_connects: 5,
            listen_port: 6881,
            tracker_timeout: Duration::from_secs(30),
            user_agent: "shoal/0.1.0",
        }
    }
}

/// Output file configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Suffix of the in-progress file, removed once every piece is written
    pub temp_file_suffix: &'static str,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_file_suffix: ".part",
        }
    }
}

impl ShoalConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(seconds) = env_number::<u64>("SHOAL_CONNECT_TIMEOUT") {
            config.network.connect_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_number::<u64>("SHOAL_READ_TIMEOUT") {
            config.network.read_timeout = Duration::from_secs(seconds);
        }

        if let Some(count) = env_number::<usize>("SHOAL_MAX_CONNECTS") {
            config.network.max_concurrent_connects = count.max(1);
        }

        if let Some(attempts) = env_number::<u32>("SHOAL_MAX_PIECE_ATTEMPTS") {
            config.torrent.max_piece_attempts = attempts.max(1);
        }

        config
    }

    /// Creates a configuration with short timeouts for tests against local peers.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.network.connect_timeout = Duration::from_secs(2);
        config.network.read_timeout = Duration::from_millis(500);
        config.torrent.max_piece_attempts = 3;
        config
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

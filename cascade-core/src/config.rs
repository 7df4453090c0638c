//! Centralized configuration for Cascade.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::policy::SelectionPolicy;
use crate::stream::StreamTarget;

/// Central configuration for all Cascade components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct CascadeConfig {
    pub server: ServerConfig,
    pub catalog: CatalogConfig,
    pub stream: StreamConfig,
    pub policy: SelectionPolicy,
}

/// Whether the server confirms stream starts with a `READY` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyHandshake {
    /// Minimal protocol: nothing is written after a stream request.
    #[default]
    Disabled,
    /// Write `READY` after every successful stream start.
    Announce,
}

/// Listener and session behaviour.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the dispatcher binds to
    pub listen_addr: SocketAddr,
    /// Read timeout for every line before streaming starts
    pub handshake_timeout: Duration,
    /// Read timeout while streaming (None = wait for the client indefinitely)
    pub idle_timeout: Option<Duration>,
    /// Optional READY acknowledgement
    pub ready_handshake: ReadyHandshake,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8888)),
            handshake_timeout: Duration::from_secs(30),
            idle_timeout: None,
            ready_handshake: ReadyHandshake::Disabled,
        }
    }
}

/// Content directory and startup synthesis.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Directory holding `<title>-<N>p.<format>` files
    pub content_dir: PathBuf,
    /// Transcoder binary used for synthesis
    pub ffmpeg_path: PathBuf,
    /// Whether missing renditions are synthesized at startup
    pub synthesize: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("videos"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            synthesize: true,
        }
    }
}

/// Where stream processes send media.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TargetHost {
    /// Stream back to the address the client connected from.
    #[default]
    Peer,
    /// Always stream to this host.
    Fixed(String),
}

/// External streaming process settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Streaming binary
    pub ffmpeg_path: PathBuf,
    /// Destination host policy
    pub target_host: TargetHost,
    /// Destination port on the client side
    pub target_port: u16,
    /// CSV file receiving one row per stream start (None = disabled)
    pub stats_file: Option<PathBuf>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            target_host: TargetHost::Peer,
            target_port: 1234,
            stats_file: Some(PathBuf::from("logs/server_stats.csv")),
        }
    }
}

impl StreamConfig {
    /// Resolves the stream destination for a client connecting from `peer`.
    pub fn target_for(&self, peer: IpAddr) -> StreamTarget {
        let host = match &self.target_host {
            TargetHost::Peer => peer.to_string(),
            TargetHost::Fixed(host) => host.clone(),
        };
        StreamTarget::new(host, self.target_port)
    }
}

impl CascadeConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("CASCADE_LISTEN_ADDR") {
            if let Ok(addr) = addr.parse::<SocketAddr>() {
                config.server.listen_addr = addr;
            }
        }

        if let Ok(seconds) = std::env::var("CASCADE_HANDSHAKE_TIMEOUT") {
            if let Ok(seconds) = seconds.parse::<u64>() {
                config.server.handshake_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(seconds) = std::env::var("CASCADE_IDLE_TIMEOUT") {
            if let Ok(seconds) = seconds.parse::<u64>() {
                config.server.idle_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
            }
        }

        if let Ok(enabled) = std::env::var("CASCADE_READY_HANDSHAKE") {
            if enabled.parse().unwrap_or(false) {
                config.server.ready_handshake = ReadyHandshake::Announce;
            }
        }

        if let Ok(dir) = std::env::var("CASCADE_CONTENT_DIR") {
            config.catalog.content_dir = PathBuf::from(dir);
        }

        if let Ok(ffmpeg) = std::env::var("CASCADE_FFMPEG") {
            config.catalog.ffmpeg_path = PathBuf::from(&ffmpeg);
            config.stream.ffmpeg_path = PathBuf::from(ffmpeg);
        }

        if let Ok(host) = std::env::var("CASCADE_STREAM_HOST") {
            config.stream.target_host = TargetHost::Fixed(host);
        }

        if let Ok(port) = std::env::var("CASCADE_STREAM_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.stream.target_port = port;
            }
        }

        config
    }

    /// Creates a configuration suited to tests: ephemeral port, short
    /// timeouts, no stats file.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                handshake_timeout: Duration::from_secs(5),
                ..ServerConfig::default()
            },
            stream: StreamConfig {
                stats_file: None,
                ..StreamConfig::default()
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = CascadeConfig::default();

        assert_eq!(config.server.listen_addr.port(), 8888);
        assert_eq!(config.server.handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.server.idle_timeout, None);
        assert_eq!(config.server.ready_handshake, ReadyHandshake::Disabled);
        assert_eq!(config.catalog.content_dir, PathBuf::from("videos"));
        assert!(config.catalog.synthesize);
        assert_eq!(config.stream.target_port, 1234);
        assert_eq!(config.stream.target_host, TargetHost::Peer);
    }

    #[test]
    fn test_target_resolution() {
        let mut stream = StreamConfig::default();
        let peer: IpAddr = "192.168.1.20".parse().unwrap();
        assert_eq!(stream.target_for(peer), StreamTarget::new("192.168.1.20", 1234));

        stream.target_host = TargetHost::Fixed("localhost".to_string());
        assert_eq!(stream.target_for(peer), StreamTarget::new("localhost", 1234));
    }

    #[test]
    fn test_testing_preset() {
        let config = CascadeConfig::for_testing();
        assert_eq!(config.server.listen_addr.port(), 0);
        assert!(config.stream.stats_file.is_none());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("CASCADE_LISTEN_ADDR", "127.0.0.1:9999");
            std::env::set_var("CASCADE_HANDSHAKE_TIMEOUT", "5");
            std::env::set_var("CASCADE_IDLE_TIMEOUT", "600");
            std::env::set_var("CASCADE_READY_HANDSHAKE", "true");
            std::env::set_var("CASCADE_CONTENT_DIR", "/srv/media");
            std::env::set_var("CASCADE_STREAM_HOST", "10.0.0.2");
            std::env::set_var("CASCADE_STREAM_PORT", "5004");
        }

        let config = CascadeConfig::from_env();

        assert_eq!(config.server.listen_addr, "127.0.0.1:9999".parse().unwrap());
        assert_eq!(config.server.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.server.idle_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.server.ready_handshake, ReadyHandshake::Announce);
        assert_eq!(config.catalog.content_dir, PathBuf::from("/srv/media"));
        assert_eq!(
            config.stream.target_host,
            TargetHost::Fixed("10.0.0.2".to_string())
        );
        assert_eq!(config.stream.target_port, 5004);

        // Cleanup
        unsafe {
            std::env::remove_var("CASCADE_LISTEN_ADDR");
            std::env::remove_var("CASCADE_HANDSHAKE_TIMEOUT");
            std::env::remove_var("CASCADE_IDLE_TIMEOUT");
            std::env::remove_var("CASCADE_READY_HANDSHAKE");
            std::env::remove_var("CASCADE_CONTENT_DIR");
            std::env::remove_var("CASCADE_STREAM_HOST");
            std::env::remove_var("CASCADE_STREAM_PORT");
        }
    }
}
